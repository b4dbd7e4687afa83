use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocsError {
    /// Malformed S-expression input (unbalanced brackets, empty document).
    #[error("malformed S-expression: {0}")]
    Structural(String),

    /// The design or its annotations cannot drive a run (missing stackup,
    /// malformed offset fields, unknown template layers).
    #[error("{0}")]
    Configuration(String),

    /// The host platform cannot perform a convenience action.
    #[error("environment error: {0}")]
    Environment(String),

    #[error("PDF structure error: {0}")]
    Pdf(String),

    #[error("{operation} failed on {file} in {}: {source}", .folder.display())]
    Artifact {
        operation: &'static str,
        file: String,
        folder: PathBuf,
        #[source]
        source: Box<DocsError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("PDF error: {0}")]
    Lopdf(#[from] lopdf::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("config file error: {0}")]
    Ini(#[from] ini::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocsError {
    /// Attach file/folder context to a per-artifact failure.
    pub fn artifact(
        operation: &'static str,
        file: impl Into<String>,
        folder: impl Into<PathBuf>,
        source: DocsError,
    ) -> Self {
        DocsError::Artifact {
            operation,
            file: file.into(),
            folder: folder.into(),
            source: Box::new(source),
        }
    }
}
