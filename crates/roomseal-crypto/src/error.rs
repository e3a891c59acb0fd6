use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("crypto state not initialized")]
    NotInitialized,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signing failed: {0}")]
    SigningError(String),

    #[error("verification failed: {0}")]
    VerificationError(String),

    #[error("encryption failed: {0}")]
    EncryptionError(String),

    #[error("decryption failed: {0}")]
    DecryptionError(String),

    #[error("decryption is not supported for session {session_id}")]
    DecryptionUnsupported { session_id: String },

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("no session available: {0}")]
    SessionUnavailable(String),

    #[error("session error: {0}")]
    SessionError(String),

    #[error("prekey error: {0}")]
    PreKeyError(String),

    #[error("canonical serialization failed: {0}")]
    Serialization(String),
}
