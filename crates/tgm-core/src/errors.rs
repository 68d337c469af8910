use std::io;

/// Core error type for the monitor.
///
/// Adapter crates should map their specific errors into this type so the
/// dispatcher can apply one failure policy per task kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("resource busy: {resource}")]
    ResourceBusy { resource: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// True for the "another process holds the resource" class of failures.
    ///
    /// Classification is by variant and `io::ErrorKind`, never by message text.
    pub fn is_resource_busy(&self) -> bool {
        match self {
            Error::ResourceBusy { .. } => true,
            Error::Io(e) => matches!(e.kind(), io::ErrorKind::WouldBlock),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
