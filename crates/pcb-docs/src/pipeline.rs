//! One documentation run: fabrication outputs, reports, assembly
//! drawings and the final archive, reported through a progress stream.

use crate::board::Board;
use crate::config::{
    DocsConfig, FabPreset, BOM_DIR, DRILL_DIR, GERBER_DIR, PLACEMENT_DIR, PLACEMENT_FILE,
    STACKUP_DIR,
};
use crate::error::DocsError;
use crate::notify::Notifier;
use crate::plot::{self, AssemblyOutput, PlotService};
use crate::records::RecordBuilder;
use crate::report;
use crate::rotations::RotationDatabase;
use crate::stackup;
use crate::stage::{self, ArchiveStager};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Percent(u8),
    Failed,
    Done,
}

/// Where a finished run left its files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// The dated output folder, or the kept temp folder when staging failed.
    pub folder: PathBuf,
    pub archive: Option<PathBuf>,
    pub assembly: AssemblyOutput,
}

pub struct Pipeline {
    preset: FabPreset,
    config: DocsConfig,
    rotations: RotationDatabase,
    reveal: bool,
}

impl Pipeline {
    pub fn new(preset: FabPreset, config: DocsConfig, rotations: RotationDatabase) -> Self {
        Self {
            preset,
            config,
            rotations,
            reveal: true,
        }
    }

    /// Whether to open the resulting folder in the file manager.
    pub fn reveal_folders(mut self, reveal: bool) -> Self {
        self.reveal = reveal;
        self
    }

    /// Run on a background thread; progress arrives on the returned receiver.
    pub fn spawn<B>(
        self,
        board: B,
        plotter: Box<dyn PlotService>,
        notifier: Box<dyn Notifier>,
    ) -> (JoinHandle<Result<RunSummary, DocsError>>, Receiver<Progress>)
    where
        B: Board + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || self.run(&board, plotter.as_ref(), notifier.as_ref(), &tx));
        (handle, rx)
    }

    pub fn run(
        &self,
        board: &dyn Board,
        plotter: &dyn PlotService,
        notifier: &dyn Notifier,
        progress: &Sender<Progress>,
    ) -> Result<RunSummary, DocsError> {
        report_progress(progress, 0);
        let stager = ArchiveStager::new(board);

        let assembly = match self.generate(board, plotter, notifier, progress, &stager) {
            Ok(assembly) => assembly,
            Err(e) => {
                notifier.error(&e);
                let _ = progress.send(Progress::Failed);
                return Err(e);
            }
        };

        let summary = match stager.finalize() {
            Ok(folder) => {
                self.reveal_folder(&folder, notifier);
                if let Err(e) = stager.cleanup() {
                    notifier.error(&e);
                }
                RunSummary {
                    folder,
                    archive: Some(stager.archive_path()),
                    assembly,
                }
            }
            Err(e) => {
                let temp = stager.temp_dir();
                notifier.error(&DocsError::artifact(
                    "make_archive",
                    stager.output_name(),
                    stager.output_dir().parent().map(Path::to_path_buf).unwrap_or_default(),
                    e,
                ));
                warn!("keeping {} for inspection", temp.display());
                self.reveal_folder(&temp, notifier);
                RunSummary {
                    folder: temp,
                    archive: None,
                    assembly,
                }
            }
        };

        notifier.finished(&format!(
            "{}\n\nOutput folder: {}",
            summary.assembly.summary(),
            summary.folder.display()
        ));
        let _ = progress.send(Progress::Done);
        Ok(summary)
    }

    fn generate(
        &self,
        board: &dyn Board,
        plotter: &dyn PlotService,
        notifier: &dyn Notifier,
        progress: &Sender<Progress>,
        stager: &ArchiveStager,
    ) -> Result<AssemblyOutput, DocsError> {
        let project = board.project_name();
        let temp = stager.prepare()?;
        plot::check_job_writable(&temp)?;

        report_progress(progress, 5);
        let dir = create_dir(&temp, GERBER_DIR)?;
        let layers = plot::enabled_gerber_layers(board, &self.preset.gerber_plan);
        plotter.plot_gerbers(board, &layers, &dir)?;

        report_progress(progress, 15);
        let dir = create_dir(&temp, DRILL_DIR)?;
        plotter.write_drills(board, &dir)?;

        report_progress(progress, 40);
        let records = RecordBuilder::new(&self.rotations).build(board)?;
        let dir = create_dir(&temp, PLACEMENT_DIR)?;
        report::write_positions(&dir.join(PLACEMENT_FILE), &records.placements)?;

        report_progress(progress, 60);
        let dir = create_dir(&temp, BOM_DIR)?;
        let bom_csv = dir.join(format!("Bill of Materials-{project}.csv"));
        if report::write_bom_csv(&bom_csv, &records.bom)? {
            report::csv_to_xlsx(&bom_csv, &bom_csv.with_extension("xlsx"), "BOM")?;
        }

        report_progress(progress, 70);
        let layers = stackup::extract_from_text(board.design_text())?;
        if layers.is_empty() {
            return Err(DocsError::Configuration("Configure the PCB stack.".to_string()));
        }
        let dir = create_dir(&temp, STACKUP_DIR)?;
        report::write_stackup_xlsx(&dir.join(format!("{project}.xlsx")), &layers)?;

        report_progress(progress, 75);
        let assembly = plot::plot_assembly_drawings(
            board,
            plotter,
            &self.preset.templates,
            &self.config,
            &temp,
            notifier,
        )?;
        stager.bundle_gerbers()?;

        report_progress(progress, 90);
        Ok(assembly)
    }

    fn reveal_folder(&self, folder: &Path, notifier: &dyn Notifier) {
        if !self.reveal {
            return;
        }
        if let Err(e) = stage::reveal(folder) {
            notifier.error(&e);
        }
    }
}

fn report_progress(progress: &Sender<Progress>, percent: u8) {
    info!("progress {percent}%");
    let _ = progress.send(Progress::Percent(percent));
}

fn create_dir(parent: &Path, name: &str) -> Result<PathBuf, DocsError> {
    let dir = parent.join(name);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GERBER_ARCHIVE, JOB_FILE};
    use crate::kicad;
    use crate::kicad::tests::SAMPLE_BOARD;
    use crate::notify::testing::RecordingNotifier;
    use crate::plot::testing::FakePlotter;
    use lopdf::Document;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            FabPreset::jlcpcb().unwrap(),
            DocsConfig::default(),
            RotationDatabase::builtin(),
        )
        .reveal_folders(false)
    }

    fn write_board(dir: &Path, text: &str) -> kicad::KicadBoard {
        let path = dir.join("demo.kicad_pcb");
        fs::write(&path, text).unwrap();
        kicad::load(&path).unwrap()
    }

    #[test]
    fn test_end_to_end_run() {
        let dir = tempfile::tempdir().unwrap();
        let board = write_board(dir.path(), SAMPLE_BOARD);
        let stager = ArchiveStager::new(&board);
        let notifier = RecordingNotifier::default();

        let (handle, progress) = pipeline().spawn(
            board,
            Box::new(FakePlotter::default()),
            Box::new(notifier.clone()),
        );
        let summary = handle.join().unwrap().unwrap();
        let steps: Vec<Progress> = progress.iter().collect();

        assert!(notifier.errors().is_empty(), "{:?}", notifier.errors());
        assert_eq!(
            steps,
            [0, 5, 15, 40, 60, 70, 75, 90]
                .into_iter()
                .map(Progress::Percent)
                .chain([Progress::Done])
                .collect::<Vec<_>>()
        );

        let out = stager.output_dir();
        assert_eq!(summary.folder, out);
        assert!(stager.archive_path().exists());
        assert!(!stager.temp_dir().exists());

        let job = Document::load(out.join(JOB_FILE)).unwrap();
        assert_eq!(job.get_pages().len(), 2);

        let positions = fs::read_to_string(out.join(PLACEMENT_DIR).join(PLACEMENT_FILE)).unwrap();
        assert_eq!(positions.lines().count(), 3);
        assert!(positions.contains("R1,10.5,4.75,"));
        assert!(positions.contains("C1,20.0,-10.0,"));

        let bom = fs::read_to_string(out.join(BOM_DIR).join("Bill of Materials-demo.csv")).unwrap();
        assert_eq!(bom.lines().count(), 2);
        assert!(bom.contains("RC0603FR-0710KL"));
        assert!(out.join(BOM_DIR).join("Bill of Materials-demo.xlsx").exists());
        assert!(out.join(STACKUP_DIR).join("demo.xlsx").exists());
        assert!(out.join(GERBER_ARCHIVE).exists());
        assert_eq!(fs::read_dir(out.join(GERBER_DIR)).unwrap().count(), 5);
        assert!(!out.join("demo_Top.pdf").exists());

        let summaries = notifier.summaries();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].contains("All done!"));
    }

    #[test]
    fn test_excluded_part_leaves_both_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let text = SAMPLE_BOARD.replace(
            "(attr smd exclude_from_bom)",
            "(attr smd exclude_from_pos_files exclude_from_bom)",
        );
        let board = write_board(dir.path(), &text);
        let stager = ArchiveStager::new(&board);
        let notifier = RecordingNotifier::default();
        let (tx, _rx) = mpsc::channel();

        let summary = pipeline()
            .run(&board, &FakePlotter::default(), &notifier, &tx)
            .unwrap();

        assert!(notifier.errors().is_empty(), "{:?}", notifier.errors());
        let out = stager.output_dir();
        assert_eq!(summary.folder, out);

        let positions = fs::read_to_string(out.join(PLACEMENT_DIR).join(PLACEMENT_FILE)).unwrap();
        let rows: Vec<&str> = positions.lines().skip(1).collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].starts_with("R1,10.5,4.75,"));

        let bom = fs::read_to_string(out.join(BOM_DIR).join("Bill of Materials-demo.csv")).unwrap();
        assert_eq!(bom.lines().count(), 2);
        assert!(!bom.contains("C1"));

        let job = Document::load(out.join(JOB_FILE)).unwrap();
        assert_eq!(job.get_pages().len(), 2);
    }

    #[test]
    fn test_missing_stackup_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let board = write_board(
            dir.path(),
            "(kicad_pcb (version 20221018) (layers (0 \"F.Cu\" signal)))",
        );
        let notifier = RecordingNotifier::default();
        let (tx, rx) = mpsc::channel();

        let err = pipeline()
            .run(&board, &FakePlotter::default(), &notifier, &tx)
            .unwrap_err();
        drop(tx);

        assert!(matches!(err, DocsError::Configuration(ref msg) if msg.contains("PCB stack")));
        assert_eq!(notifier.errors().len(), 1);
        assert!(notifier.summaries().is_empty());
        let steps: Vec<Progress> = rx.iter().collect();
        assert_eq!(steps.last(), Some(&Progress::Failed));
        assert!(!steps.contains(&Progress::Percent(75)));
    }

    #[test]
    fn test_bad_offset_aborts_before_reports() {
        let dir = tempfile::tempdir().unwrap();
        let text = SAMPLE_BOARD.replace(
            "(property \"Unit price\" \"0.01\")",
            "(property \"Unit price\" \"0.01\") (property \"JLCPCB Rotation Offset\" \"left\")",
        );
        let board = write_board(dir.path(), &text);
        let stager = ArchiveStager::new(&board);
        let notifier = RecordingNotifier::default();
        let (tx, _rx) = mpsc::channel();

        let err = pipeline()
            .run(&board, &FakePlotter::default(), &notifier, &tx)
            .unwrap_err();
        assert!(err.to_string().contains("R1"));
        assert!(!stager.temp_dir().join(PLACEMENT_DIR).exists());
    }

    #[test]
    fn test_staging_failure_keeps_temp() {
        let dir = tempfile::tempdir().unwrap();
        let board = write_board(dir.path(), SAMPLE_BOARD);
        let stager = ArchiveStager::new(&board);
        // a directory where the archive should go makes zipping fail
        fs::create_dir_all(stager.archive_path()).unwrap();
        let notifier = RecordingNotifier::default();
        let (tx, rx) = mpsc::channel();

        let summary = pipeline()
            .run(&board, &FakePlotter::default(), &notifier, &tx)
            .unwrap();
        drop(tx);

        assert_eq!(summary.folder, stager.temp_dir());
        assert!(summary.archive.is_none());
        assert!(stager.temp_dir().join(JOB_FILE).exists());
        let errors = notifier.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("make_archive"));
        assert_eq!(rx.iter().last(), Some(Progress::Done));
    }
}
