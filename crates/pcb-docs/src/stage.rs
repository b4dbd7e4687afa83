use crate::board::Board;
use crate::config::{DRILL_DIR, GERBER_ARCHIVE, GERBER_DIR, OUTPUT_PREFIX, TEMP_DIR};
use crate::error::DocsError;
use crate::stackup::document_revision;
use chrono::NaiveDate;
use log::{debug, info};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Lays out the artifact tree of one run next to the board file:
/// a scratch `temp/` directory while generating, then a dated
/// `production_*` folder and its zip archive.
#[derive(Debug, Clone)]
pub struct ArchiveStager {
    project_dir: PathBuf,
    output_name: String,
}

impl ArchiveStager {
    pub fn new(board: &dyn Board) -> Self {
        Self::for_date(board, chrono::Local::now().date_naive())
    }

    pub fn for_date(board: &dyn Board, date: NaiveDate) -> Self {
        let revision = document_revision(board.design_text()).unwrap_or_else(|| "0".to_string());
        let output_name = format!(
            "{OUTPUT_PREFIX}_{}_{}_{revision}",
            board.project_name(),
            date.format("%d-%m-%Y")
        );
        Self {
            project_dir: board.project_dir(),
            output_name,
        }
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.project_dir.join(TEMP_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.project_dir.join(&self.output_name)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.project_dir.join(format!("{}.zip", self.output_name))
    }

    /// Remove leftovers of earlier runs and create an empty temp directory.
    pub fn prepare(&self) -> Result<PathBuf, DocsError> {
        remove_tree(&self.temp_dir())?;
        remove_tree(&self.output_dir())?;
        let temp = self.temp_dir();
        fs::create_dir_all(&temp)?;
        debug!("staging into {}", temp.display());
        Ok(temp)
    }

    /// Flat `gerber.zip` of everything in `Gerber/` and `Drill/`.
    pub fn bundle_gerbers(&self) -> Result<PathBuf, DocsError> {
        let temp = self.temp_dir();
        let zip_path = temp.join(GERBER_ARCHIVE);
        let mut zip = ZipWriter::new(fs::File::create(&zip_path)?);
        let options = SimpleFileOptions::default();

        let mut count = 0;
        for dir in [GERBER_DIR, DRILL_DIR] {
            let dir = temp.join(dir);
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                zip.start_file(entry.file_name().to_string_lossy().into_owned(), options)?;
                zip.write_all(&fs::read(entry.path())?)?;
                count += 1;
            }
        }
        zip.finish()?;
        info!("bundled {count} fabrication files into {}", zip_path.display());
        Ok(zip_path)
    }

    /// Copy the temp tree into the output folder and zip the folder.
    pub fn finalize(&self) -> Result<PathBuf, DocsError> {
        let output = self.output_dir();
        copy_tree(&self.temp_dir(), &output)?;
        zip_directory(&output, &self.archive_path())?;
        info!("wrote {}", self.archive_path().display());
        Ok(output)
    }

    pub fn cleanup(&self) -> Result<(), DocsError> {
        remove_tree(&self.temp_dir())
    }
}

/// Remove a directory tree, clearing read-only flags first. Symlinks are
/// removed, never followed.
fn remove_tree(dir: &Path) -> Result<(), DocsError> {
    let Ok(meta) = fs::symlink_metadata(dir) else {
        return Ok(());
    };
    if meta.file_type().is_symlink() {
        fs::remove_file(dir)?;
        return Ok(());
    }
    for entry in WalkDir::new(dir).follow_links(false).contents_first(true) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            fs::remove_dir(path)?;
            continue;
        }
        if entry.file_type().is_file() {
            if let Ok(mut perms) = fs::metadata(path).map(|m| m.permissions()) {
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                let _ = fs::set_permissions(path, perms);
            }
        }
        fs::remove_file(path)?;
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), DocsError> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let target = dst.join(entry.path().strip_prefix(src).unwrap_or(entry.path()));
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            debug!("not copying link {}", entry.path().display());
        }
    }
    Ok(())
}

/// Zip the contents of `dir` with paths relative to it.
pub fn zip_directory(dir: &Path, zip_path: &Path) -> Result<(), DocsError> {
    let mut zip = ZipWriter::new(fs::File::create(zip_path)?);
    let options = SimpleFileOptions::default();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        let path = entry.path();
        let name = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            std::io::copy(&mut fs::File::open(path)?, &mut zip)?;
        }
    }
    zip.finish()?;
    Ok(())
}

/// Open a folder in the platform file manager.
pub fn reveal(path: &Path) -> Result<(), DocsError> {
    open::that(path).map_err(|e| {
        DocsError::Environment(format!("cannot open {}: {e}", path.display()))
    })
}
