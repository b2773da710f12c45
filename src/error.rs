// src/error.rs
// Error taxonomy for the vault. Messages never carry key material or plaintext.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Empty password or plaintext where a value is required.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("password hash is malformed")]
    MalformedHash,

    /// AEAD tag mismatch, undersized frame or undecodable blob.
    #[error("authentication failed (tampered data or wrong key)")]
    Authentication,

    #[error("encryption failed")]
    Encryption,

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// A store operation ran while the session is logged out.
    #[error("session is locked, no key available")]
    KeyNotAvailable,

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid onion address")]
    InvalidOnionAddress,

    /// Deliberately the same for "no account" and "bad password".
    #[error("wrong password")]
    WrongPassword,

    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("an account already exists")]
    AccountExists,

    #[error("argon2 time cost has not been calibrated")]
    NotCalibrated,

    #[error("calibration failed: {0}")]
    Calibration(String),

    #[error("unlock superseded by lock")]
    UnlockSuperseded,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("store worker is gone")]
    WorkerGone,
}

pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    /// Errors that must reach the user verbatim instead of being degraded
    /// to an empty listing.
    pub fn is_crypto_failure(&self) -> bool {
        matches!(self, VaultError::Authentication | VaultError::KeyDerivation(_))
    }
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::Settings(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Settings(e.to_string())
    }
}
