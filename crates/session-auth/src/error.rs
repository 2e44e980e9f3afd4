//! Error types for credential and renewal operations

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("renewal rejected: {0}")]
    RenewalRejected(String),

    #[error("invalid renewal response: {0}")]
    InvalidRenewalResponse(String),

    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
