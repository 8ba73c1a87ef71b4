use thiserror::Error;

#[derive(Error, Debug)]
pub enum CounterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Persist failed after {attempts} attempt(s): {source}")]
    PersistFailed {
        attempts: u32,
        #[source]
        source: Box<CounterError>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, CounterError>;

impl CounterError {
    /// True for failures of a single physical save that are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Lock(_))
    }
}

impl From<serde_json::Error> for CounterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CounterError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker(err.to_string())
    }
}
