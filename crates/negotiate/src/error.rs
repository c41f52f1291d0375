//! Error types for SPNEGO operations

/// Errors from credential handling and security context negotiation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no usable credential: {0}")]
    Credential(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("invalid negotiation token: {0}")]
    InvalidToken(String),

    #[error("invalid service principal: {0}")]
    InvalidPrincipal(String),
}

/// Result alias for negotiate operations.
pub type Result<T> = std::result::Result<T, Error>;
