use thiserror::Error;

/// Errors surfaced to callers of the dispatch engine and the REST boundary.
///
/// The variants map one-to-one onto the send-path failure modes: validation
/// failures are rejected before persistence, `NotFound`/`Forbidden` abort
/// with no partial state change, and `ServerError` covers persistence or
/// transport failures after validation passed. Broadcast delivery is fire
/// and forget and never produces one of these.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Missing required fields or a malformed target.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A referenced message, group, or user does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authorization failure (non-sender edit/delete, non-admin pin).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Persistence or transport failure.
    #[error("Server error: {0}")]
    ServerError(String),
}
