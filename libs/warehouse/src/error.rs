use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions of the warehouse pipeline.
///
/// Row-level defects are not represented here: they are dropped where they
/// are found and only reported in run statistics.
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("missing source file: {}", path.display())]
    MissingSource { path: PathBuf },

    #[error("schema error in {table}: {reason}")]
    Schema { table: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl WarehouseError {
    pub fn schema(table: &str, reason: impl Into<String>) -> Self {
        WarehouseError::Schema {
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WarehouseError>;
