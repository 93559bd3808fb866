//! Error types shared across the crate.

use thiserror::Error;

/// Failure modes of the certificate-authority core.
///
/// The enum is closed on purpose: callers match on it to distinguish
/// authorization denials from state conflicts from cryptographic failures.
/// Messages never contain key material, derived secrets, or the inputs to
/// master-secret derivation.
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("organization mismatch: {0}")]
    OrgMismatch(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("certificate is not a CA certificate")]
    NotCa,

    #[error("parent CA certificate has expired")]
    ExpiredParent,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PkiError {
    /// Shorthand for a missing-entity error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        PkiError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<openssl::error::ErrorStack> for PkiError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        PkiError::Crypto(err.to_string())
    }
}

pub type Result<T, E = PkiError> = std::result::Result<T, E>;
