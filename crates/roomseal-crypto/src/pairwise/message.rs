use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encoding;

/// A message on an established pairwise session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalMessage {
    pub index: u32,
    pub ciphertext: Vec<u8>,
}

/// A message sent before the initiator has heard back from the responder.
///
/// Carries the public keys the responder needs to derive the same session:
/// the initiator's identity key, the initiator's fresh base key, and which of
/// the responder's one-time keys was used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyMessage {
    pub identity_key: [u8; 32],
    pub base_key: [u8; 32],
    pub one_time_key: [u8; 32],
    pub message: NormalMessage,
}

impl PreKeyMessage {
    /// Id of the session this message belongs to.
    pub fn session_id(&self) -> String {
        encoding::encode(session_hash(
            &self.identity_key,
            &self.base_key,
            &self.one_time_key,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum PairwiseMessage {
    PreKey(PreKeyMessage),
    Normal(NormalMessage),
}

impl PairwiseMessage {
    pub fn body(&self) -> &NormalMessage {
        match self {
            Self::PreKey(m) => &m.message,
            Self::Normal(m) => m,
        }
    }

    pub fn is_prekey(&self) -> bool {
        matches!(self, Self::PreKey(_))
    }
}

pub(crate) fn session_hash(
    identity_key: &[u8; 32],
    base_key: &[u8; 32],
    one_time_key: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(identity_key);
    hasher.update(base_key);
    hasher.update(one_time_key);
    hasher.finalize().into()
}
