use roomseal_crypto::CryptoError;
use thiserror::Error;

/// Failure reported by a [`KeyTransport`](crate::transport::KeyTransport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server error {errcode}: {message}")]
    Server {
        errcode: String,
        message: String,
        retry_after_ms: Option<u64>,
    },
}

#[derive(Debug, Error)]
pub enum E2eeError {
    #[error("crypto not initialized")]
    CryptoNotInitialized,

    #[error("crypto operation failed: {0}")]
    CryptoOperationFailed(String),

    #[error("no session available: {0}")]
    SessionUnavailable(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption is not supported for session {session_id}")]
    DecryptionUnsupported { session_id: String },

    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl E2eeError {
    /// Worth retrying the same call later. Every transport failure is; use
    /// [`retry_after_ms`](Self::retry_after_ms) for the server's delay hint.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }

    /// The machine must be initialized again before the call can succeed.
    pub fn requires_reinitialization(&self) -> bool {
        matches!(self, Self::CryptoNotInitialized | Self::SessionUnavailable(_))
    }

    /// Retrying will never help; the input or the missing feature is the problem.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::DecryptionUnsupported { .. }
                | Self::CryptoOperationFailed(_)
        )
    }

    /// Server-suggested delay before retrying, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::TransportFailure(TransportError::Server { retry_after_ms, .. }) => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<CryptoError> for E2eeError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::NotInitialized => Self::CryptoNotInitialized,
            CryptoError::EncryptionError(msg) => Self::EncryptionFailed(msg),
            CryptoError::SessionUnavailable(msg) => Self::SessionUnavailable(msg),
            CryptoError::DecryptionUnsupported { session_id } => {
                Self::DecryptionUnsupported { session_id }
            }
            other => Self::CryptoOperationFailed(other.to_string()),
        }
    }
}
