use thiserror::Error;

/// All errors that can occur in skumerge-core.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Unsupported column '{column}' of type {data_type}")]
    UnsupportedColumn { column: String, data_type: String },

    #[error("Schema mismatch in chunk {chunk}, record {record}: {detail}")]
    SchemaMismatch {
        chunk: usize,
        /// Offset of the record within its chunk.
        record: usize,
        detail: String,
    },

    #[error("Failed reading chunk {chunk}: {source}")]
    Read {
        chunk: usize,
        #[source]
        source: arrow::error::ArrowError,
    },

    #[error("Block '{block}' in chunk {chunk} failed after {attempts} attempt(s): {reason}")]
    BlockFailed {
        chunk: usize,
        block: String,
        attempts: u32,
        reason: String,
    },

    #[error("Matcher error: {0}")]
    Matcher(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Could not finalize output file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Exit codes used by the `skumerge` binary.
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NotFound = 2,
    InvalidArgs = 3,
    FileSystemError = 4,
    MatchingFailed = 5,
}

impl DedupError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            DedupError::InvalidConfig(_) => ExitCode::InvalidArgs,
            DedupError::MissingColumn(_)
            | DedupError::UnsupportedColumn { .. }
            | DedupError::SchemaMismatch { .. } => ExitCode::NotFound,
            DedupError::BlockFailed { .. } | DedupError::Matcher(_) | DedupError::WorkerPool(_) => {
                ExitCode::MatchingFailed
            }
            DedupError::Io(_) | DedupError::Persist(_) => ExitCode::FileSystemError,
            _ => ExitCode::GeneralError,
        }
    }
}

pub type Result<T> = std::result::Result<T, DedupError>;
