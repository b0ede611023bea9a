use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// The pipeline stage an ingestion failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Extract,
    Chunk,
    Vectorize,
    Store,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Extract => "extract",
            Self::Chunk => "chunk",
            Self::Vectorize => "vectorize",
            Self::Store => "store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported format: {hint}")]
    UnsupportedFormat { hint: String },

    #[error("corrupt {kind} document: {reason}")]
    CorruptDocument { kind: &'static str, reason: String },

    #[error("could not decode text with any of: {tried}")]
    UndecodableText { tried: String },

    #[error("the index is empty; ingest a document first")]
    EmptyIndex,

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error(
        "generation {found} was built on a stale snapshot (current is {current})"
    )]
    StaleGeneration { current: u64, found: u64 },

    #[error("ingestion failed during {stage}: {source}")]
    IngestionFailed {
        stage: IngestStage,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("vector has {found} components, index dimension is {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Wrap this error as a failure of the given ingestion stage.
    pub fn at_stage(self, stage: IngestStage) -> Self {
        Self::IngestionFailed {
            stage,
            source: Box::new(self),
        }
    }

    /// The stage an ingestion failed in, if this is an ingestion failure.
    pub fn stage(&self) -> Option<IngestStage> {
        match self {
            Self::IngestionFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_stage_wraps_and_reports_stage() {
        let err = Error::UnsupportedFormat {
            hint: "image/png".to_string(),
        }
        .at_stage(IngestStage::Extract);

        assert_eq!(err.stage(), Some(IngestStage::Extract));
        let message = err.to_string();
        assert!(message.contains("extract"));
        assert!(message.contains("image/png"));
    }

    #[test]
    fn plain_errors_have_no_stage() {
        assert_eq!(Error::EmptyIndex.stage(), None);
    }
}
