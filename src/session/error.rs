use crate::codec::CodecError;
use thiserror::Error;

/// Session-level error taxonomy.
///
/// `Permission` and `Link` are fatal to the session being attempted or
/// running; `Format` is local (the offending chunk is dropped and the
/// pipeline continues). Reconnection is always a fresh user-initiated start.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device access denied: {0}")]
    Permission(String),
    #[error("malformed media payload: {0}")]
    Format(#[from] CodecError),
    #[error("session link failed: {0}")]
    Link(String),
    #[error("a consultation session is already active")]
    AlreadyActive,
    #[error("no consultation session is active")]
    NotActive,
}
