use super::{layer_pdf_name, DrillMarks, LayerPlotRequest, PlotCapabilities, PlotService};
use crate::board::Board;
use crate::config::GerberLayer;
use crate::error::DocsError;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Plotting services backed by the `kicad-cli` executable.
#[derive(Debug, Clone)]
pub struct KicadCli {
    program: PathBuf,
}

impl Default for KicadCli {
    fn default() -> Self {
        Self::from_env()
    }
}

impl KicadCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `$KICAD_CLI` when set, otherwise `kicad-cli` from `PATH`.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("KICAD_CLI").unwrap_or_else(|| "kicad-cli".into()))
    }

    fn pcb_export(&self, kind: &str) -> CliCommand {
        CliCommand::new(&self.program)
            .arg("pcb")
            .arg("export")
            .arg(kind)
    }

    fn gerber_command(
        &self,
        board: &dyn Board,
        layers: &[GerberLayer],
        output_dir: &Path,
    ) -> CliCommand {
        let names: Vec<&str> = layers.iter().map(|l| l.name.as_str()).collect();
        self.pcb_export("gerbers")
            .arg("--output")
            .arg(dir_arg(output_dir))
            .arg("--layers")
            .arg(names.join(","))
            .arg("--use-drill-file-origin")
            .arg("--subtract-soldermask")
            .arg("--no-protel-ext")
            .arg(board.file_path().to_string_lossy())
    }

    fn drill_command(&self, board: &dyn Board, output_dir: &Path) -> CliCommand {
        self.pcb_export("drill")
            .arg("--output")
            .arg(dir_arg(output_dir))
            .arg("--format")
            .arg("excellon")
            .arg("--drill-origin")
            .arg("plot")
            .arg("--excellon-units")
            .arg("mm")
            .arg("--excellon-min-header")
            .arg(board.file_path().to_string_lossy())
    }

    fn layer_pdf_command(
        &self,
        board: &dyn Board,
        request: &LayerPlotRequest,
        output: &Path,
    ) -> CliCommand {
        let mut cmd = self
            .pcb_export("pdf")
            .arg("--output")
            .arg(output.to_string_lossy())
            .arg("--layers")
            .arg(request.layer.as_str())
            .arg("--drill-shape-opt")
            .arg(match request.drill_marks {
                DrillMarks::None => "0",
                DrillMarks::Full => "2",
            });
        if request.mirror {
            cmd = cmd.arg("--mirror");
        }
        if request.negative {
            cmd = cmd.arg("--negative");
        }
        if request.frame {
            cmd = cmd.arg("--include-border-title");
        }
        cmd.arg(board.file_path().to_string_lossy())
    }
}

/// Directory arguments end with a separator so the tool treats them as folders.
fn dir_arg(dir: &Path) -> String {
    let mut s = dir.to_string_lossy().into_owned();
    if !s.ends_with(std::path::MAIN_SEPARATOR) {
        s.push(std::path::MAIN_SEPARATOR);
    }
    s
}

impl PlotService for KicadCli {
    fn capabilities(&self) -> PlotCapabilities {
        // no scale or via-on-mask option on the pdf exporter
        PlotCapabilities {
            mirror: true,
            scale: false,
            tenting: false,
        }
    }

    fn plot_gerbers(
        &self,
        board: &dyn Board,
        layers: &[GerberLayer],
        output_dir: &Path,
    ) -> Result<(), DocsError> {
        if layers.is_empty() {
            warn!("no enabled layers to plot as gerbers");
            return Ok(());
        }
        self.gerber_command(board, layers, output_dir).run()
    }

    fn write_drills(&self, board: &dyn Board, output_dir: &Path) -> Result<(), DocsError> {
        self.drill_command(board, output_dir).run()
    }

    fn plot_layer_pdf(
        &self,
        board: &dyn Board,
        request: &LayerPlotRequest,
    ) -> Result<PathBuf, DocsError> {
        let output = request
            .output_dir
            .join(layer_pdf_name(&board.project_name(), &request.layer));
        self.layer_pdf_command(board, request, &output).run()?;
        Ok(output)
    }
}

/// Builder for one kicad-cli invocation.
#[derive(Debug, Clone)]
struct CliCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl CliCommand {
    fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            args: Vec::new(),
        }
    }

    fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    fn run(self) -> Result<(), DocsError> {
        debug!("running {} {}", self.program.display(), self.args.join(" "));
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| {
                DocsError::Environment(format!(
                    "failed to execute {}: {e}; install KiCad or set KICAD_CLI",
                    self.program.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocsError::Environment(format!(
                "kicad-cli {} failed ({}): {}",
                self.args.iter().take(3).cloned().collect::<Vec<_>>().join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
