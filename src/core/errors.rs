/*!
 * Status Codes
 * Centralized error handling with thiserror, covering every error kind
 * the core surfaces.
 */

use thiserror::Error;

/// Result alias used throughout the crate's public surface.
pub type MpResult<T> = Result<T, Status>;

/// The core's single status enum. Success is represented by `Ok(_)`;
/// every other kind is a variant here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Status {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("try again")]
    TryAgain,

    #[error("no memory: {0}")]
    NoMemory(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timed out")]
    TimedOut,

    #[error("interrupted")]
    Interrupted,

    #[error("end of file")]
    EndOfFile,

    #[error("bad audio/video format: {0}")]
    BadAudioVideoFormat(String),

    #[error("bad multiplex format: {0}")]
    BadMultiplexFormat(String),

    #[error("error: {0}")]
    Error(String),
}

impl Status {
    /// True for the statuses that mean a blocked caller unblocked
    /// because the resource it was waiting on is shutting down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Status::EndOfFile)
    }
}
