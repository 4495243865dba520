use thiserror::Error;

/// The kind carried by a `StreamEnd` event, and the taxonomy used for
/// error propagation throughout the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoError,
    ReadError,
    WriteError,
    Unauthorized,
    ConnectionReset,
    BufferOverflow,
    Internal,
}

impl ErrorKind {
    pub fn is_error(self) -> bool {
        !matches!(self, ErrorKind::NoError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NoError => "no-error",
            ErrorKind::ReadError => "read-error",
            ErrorKind::WriteError => "write-error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::ConnectionReset => "connection-reset",
            ErrorKind::BufferOverflow => "buffer-overflow",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors surfaced synchronously by configuration/bind-time failures.
///
/// Runtime I/O and protocol failures do not produce a `PipelineError`;
/// they degrade to a `StreamEnd` event instead. This type only covers
/// the "fail loud and early" half of that policy.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("filter '{name}' not found")]
    FilterNotFound { name: String },

    #[error("circular sub-pipeline reference in '{name}'")]
    CircularReference { name: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("unknown filter type: {filter_type}")]
    UnknownFilterType { filter_type: String },

    #[error("unresolved sub-pipeline slot '{slot}' on '{filter}'")]
    UnresolvedSubPipeline { filter: String, slot: String },

    #[error("invariant violated: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
