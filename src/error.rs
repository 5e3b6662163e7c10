use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("expected {expected} bytes but got {actual}")]
    Size { expected: i64, actual: i64 },
    #[error("entity is too large: limit is {limit} bytes")]
    EntityTooLarge { limit: i64 },
    #[error("source read: {0}")]
    SourceRead(#[source] io::Error),
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{operation} request failed: {reason}")]
    RemoteTransport {
        operation: &'static str,
        reason: String,
    },
    #[error("{operation} request exceeded the object store deadline")]
    Timeout { operation: &'static str },
    #[error("integrity: {0}")]
    RemoteIntegrity(String),
    #[error("not enough parts: only {available} part URLs available")]
    NotEnoughParts { available: usize },
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("upload cancelled")]
    Cancelled,
    #[error("upload interrupted")]
    Interrupted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Size,
    SourceRead,
    LocalWrite,
    RemoteTransport,
    RemoteIntegrity,
    Configuration,
    Cancelled,
}

impl SaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SaveError::Size { .. } | SaveError::EntityTooLarge { .. } => ErrorKind::Size,
            SaveError::SourceRead(_) | SaveError::Open { .. } => ErrorKind::SourceRead,
            SaveError::LocalWrite { .. } => ErrorKind::LocalWrite,
            SaveError::RemoteTransport { .. } | SaveError::Timeout { .. } => {
                ErrorKind::RemoteTransport
            }
            SaveError::RemoteIntegrity(_) => ErrorKind::RemoteIntegrity,
            SaveError::NotEnoughParts { .. } | SaveError::Configuration(_) => {
                ErrorKind::Configuration
            }
            SaveError::Cancelled | SaveError::Interrupted => ErrorKind::Cancelled,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::Size
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SaveError::Open { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub(crate) fn is_interruption(&self) -> bool {
        matches!(self, SaveError::Interrupted)
    }

    pub(crate) fn transport(operation: &'static str, err: reqwest::Error) -> Self {
        SaveError::RemoteTransport {
            operation,
            reason: err.without_url().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SaveError>;
