pub mod board;
pub mod config;
pub mod error;
pub mod kicad;
pub mod notify;
pub mod pdf;
pub mod pipeline;
pub mod plot;
pub mod records;
pub mod report;
pub mod rotations;
pub mod sexpr;
pub mod stackup;
pub mod stage;

pub use board::{Board, Footprint};
pub use config::{DocsConfig, FabPreset};
pub use error::DocsError;
pub use kicad::KicadBoard;
pub use notify::{LogNotifier, Notifier};
pub use pipeline::{Pipeline, Progress, RunSummary};
pub use plot::{KicadCli, PlotService};
pub use rotations::RotationDatabase;

use config::{CONFIG_FILE_NAME, ROTATIONS_FILE_NAME};
use std::path::{Path, PathBuf};

/// Settings for `board`: an explicit file, or `docs.config.ini` next to it.
pub fn load_config(board: &dyn Board, path: Option<&Path>) -> Result<DocsConfig, DocsError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| board.project_dir().join(CONFIG_FILE_NAME));
    DocsConfig::load(&path)
}

/// Rotation rules for `board`: an explicit file, then `rotations.cf` next
/// to the board, then the built-in rules.
pub fn load_rotations(board: &dyn Board, path: Option<&Path>) -> Result<RotationDatabase, DocsError> {
    let local: PathBuf = board.project_dir().join(ROTATIONS_FILE_NAME);
    match path {
        Some(path) => RotationDatabase::load(path),
        None if local.is_file() => RotationDatabase::load(&local),
        None => Ok(RotationDatabase::builtin()),
    }
}
