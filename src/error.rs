use thiserror::Error;

/// Failures reported by a session driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out loading {0}")]
    LoadTimeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriverError {
    pub fn is_load_timeout(&self) -> bool {
        matches!(self, DriverError::LoadTimeout(_))
    }
}

/// Recoverable failures of the mining core. None of them stop the process.
#[derive(Debug, Error)]
pub enum MinerError {
    #[error("no streams available for campaign {0}")]
    NoStreamsAvailable(String),

    #[error("no progress detected on {0}")]
    NoProgressDetected(String),

    #[error("stream {0} failed to load")]
    StreamLoadFailed(String),

    #[error("stream {0} went down")]
    StreamWentDown(String),

    #[error("session on {stream} failed: {reason}")]
    SessionFailed { stream: String, reason: String },

    #[error("remote call failed: {0}")]
    Remote(#[from] anyhow::Error),
}
