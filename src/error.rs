use std::path::PathBuf;

use enough::StopReason;

/// Errors from requesting, reading, and decoding an image load.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("failed to open '{}': {source}", path.display())]
    IoOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not allocate load context: {0}")]
    ContextAllocFailed(String),

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("decode start failed: {0}")]
    DecodeStartFailed(String),

    #[error("decode failed: {0}")]
    DecodeProcessFailed(String),

    #[error("dimensions too large: {width}x{height}")]
    DimensionsTooLarge { width: u32, height: u32 },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("unknown load purpose '{0}'")]
    UnknownPurpose(String),

    #[error("operation cancelled")]
    Cancelled(StopReason),
}

impl LoadError {
    /// Whether this error came from cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled(_))
    }
}

impl From<StopReason> for LoadError {
    fn from(r: StopReason) -> Self {
        LoadError::Cancelled(r)
    }
}
