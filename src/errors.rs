/// Domain-specific error types for the pricing engine.
///
/// Single-option and single-date calls surface every error immediately.
/// Range scans downgrade `DataUnavailable` to a skipped date and batch runs
/// record any error as a per-ticker marker, so neither aborts sibling work.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad or missing parameter, misaligned arrays, invalid weights, steps < 1.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Market data, implied vol or historical vol missing for a required strike/date.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("output sink error: {0}")]
    Sink(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(String),
}

/// Coarse error category, kept on batch error markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    DataUnavailable,
    Sink,
    Database,
    Io,
    WorkerPanic,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::DataUnavailable(_) => ErrorKind::DataUnavailable,
            Self::Sink(_) => ErrorKind::Sink,
            Self::Database(_) => ErrorKind::Database,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    #[inline]
    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, Self::DataUnavailable(_))
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn unavailable(msg: impl Into<String>) -> Self {
        Self::DataUnavailable(msg.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        EngineError::Sink(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Sink(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
