//! Error types for the token store and the OAuth2 redirect flow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("cannot read token store: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse token store: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("token store is encrypted but no encryption key was supplied")]
    EncryptionKeyRequired,

    #[error("failed to decrypt token store: {0}")]
    Decrypt(#[source] anyhow::Error),

    #[error("failed to encrypt token store: {0}")]
    Encrypt(#[source] anyhow::Error),

    #[error("no stored credentials for calendar {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("failed to bind oauth redirect listener on port {port}: {source}")]
    Bind { port: u16, #[source] source: std::io::Error },

    #[error("invalid oauth endpoint configuration: {0}")]
    Endpoint(#[source] anyhow::Error),

    #[error("redirect listener failed: {0}")]
    Listener(#[source] std::io::Error),

    #[error("redirect state did not match the request we made, aborting")]
    StateMismatch,

    #[error("authorization server did not return a code")]
    MissingCode,

    #[error("token exchange failed: {0}")]
    Exchange(#[source] anyhow::Error),
}
