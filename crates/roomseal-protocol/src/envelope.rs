use roomseal_crypto::GroupMessage;
use serde::{Deserialize, Serialize};

use crate::error::E2eeError;
use crate::keys::MEGOLM_ALGORITHM;

/// Content of an encrypted room event.
///
/// Built once per outgoing message and never modified afterwards; a retried
/// send must encrypt again rather than reuse an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextEnvelope {
    algorithm: String,
    sender_key: String,
    ciphertext: String,
    session_id: String,
    device_id: String,
}

impl CiphertextEnvelope {
    pub(crate) fn new(
        sender_key: String,
        message: &GroupMessage,
        session_id: &str,
        device_id: &str,
    ) -> Self {
        Self {
            algorithm: MEGOLM_ALGORITHM.to_owned(),
            sender_key,
            ciphertext: message.to_base64(),
            session_id: session_id.to_owned(),
            device_id: device_id.to_owned(),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Curve25519 identity key of the sending device.
    pub fn sender_key(&self) -> &str {
        &self.sender_key
    }

    pub fn ciphertext(&self) -> &str {
        &self.ciphertext
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Parse the group message carried in `ciphertext`.
    pub fn group_message(&self) -> Result<GroupMessage, E2eeError> {
        if self.algorithm != MEGOLM_ALGORITHM {
            return Err(E2eeError::CryptoOperationFailed(format!(
                "unsupported algorithm {}",
                self.algorithm
            )));
        }
        Ok(GroupMessage::from_base64(&self.ciphertext)?)
    }
}
