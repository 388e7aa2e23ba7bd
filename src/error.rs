//! Error types shared by the upload and chart pipeline.
//!
//! Every error here is recoverable: the web layer turns it into a flashed
//! message and the process keeps serving. The `Display` text of each variant
//! is what the user sees.

use thiserror::Error;

/// Reasons an uploaded file is rejected before it is stored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Upload exceeds the configured byte limit
    #[error("File is too large ({size} bytes). Maximum size is {mb} MB.", mb = .limit / (1024 * 1024))]
    TooLarge { size: usize, limit: usize },

    /// Filename does not carry a `.csv` extension
    #[error("Invalid file type. Please upload a CSV file.")]
    InvalidType,

    /// Header row could not be decoded or parsed
    #[error("Invalid CSV file. {0}")]
    Unparseable(String),
}

/// The session already holds the maximum number of files.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Maximum number of files reached ({limit}).")]
pub struct CapacityError {
    pub limit: usize,
}

/// A session or file record that the caller referenced does not exist.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("Session not found.")]
    Session,

    #[error("File not found.")]
    File(String),
}

/// Reasons chart generation fails.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("The CSV file is empty.")]
    EmptyFile,

    #[error("Column '{0}' not found in the CSV file.")]
    MissingColumn(String),

    #[error("Column '{0}' must contain numeric data for charting.")]
    NonNumericColumn(String),

    #[error("No valid data found after removing missing values.")]
    NoValidData,

    #[error("Invalid chart type: {0}")]
    InvalidChartType(String),

    #[error("Could not generate chart: {0}")]
    Render(String),

    #[error("Could not generate chart: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for ChartError {
    fn from(err: csv::Error) -> Self {
        ChartError::Render(err.to_string())
    }
}

/// Errors from the session file store.
#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error("Could not save file: {0}")]
    Io(#[from] std::io::Error),
}
