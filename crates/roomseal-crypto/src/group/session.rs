use std::time::{Duration, Instant};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::encoding;
use crate::error::CryptoError;
use crate::group::message::GroupMessage;
use crate::ratchet::HashRatchet;

/// When an outbound session should be replaced before its next use.
///
/// Both limits are optional; with neither set a session lives until it is
/// rotated explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_messages: Option<u64>,
    pub max_age: Option<Duration>,
}

/// The sending half of a room's group ratchet.
///
/// Every message advances the ratchet exactly once, so no two messages share
/// a key even when their plaintexts are equal. The session id is the public
/// half of a per-session signing key, which also signs every message.
pub struct OutboundGroupSession {
    room_id: String,
    session_id: String,
    ratchet: HashRatchet,
    signing_key: SigningKey,
    created_at: Instant,
    message_count: u64,
}

impl OutboundGroupSession {
    pub fn new(room_id: &str) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let session_id = encoding::encode(signing_key.verifying_key().as_bytes());
        Self {
            room_id: room_id.to_owned(),
            session_id,
            ratchet: HashRatchet::random(),
            signing_key,
            created_at: Instant::now(),
            message_count: 0,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Index the next encrypted message will carry.
    pub fn message_index(&self) -> u32 {
        self.ratchet.index()
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn signing_public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn expired(&self, policy: &RotationPolicy) -> bool {
        let too_many = policy
            .max_messages
            .is_some_and(|max| self.message_count >= max);
        let too_old = policy
            .max_age
            .is_some_and(|max| self.created_at.elapsed() >= max);
        too_many || too_old
    }

    /// Encrypt `plaintext` at the current index and advance the ratchet.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<GroupMessage, CryptoError> {
        let index = self.ratchet.index();
        let keys = self.ratchet.advance()?;
        let header = GroupMessage::header(index);

        let cipher = Aes256Gcm::new_from_slice(&keys.key)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&keys.nonce),
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        let mut signed = Vec::with_capacity(header.len() + ciphertext.len());
        signed.extend_from_slice(&header);
        signed.extend_from_slice(&ciphertext);
        let signature = self.signing_key.sign(&signed);

        self.message_count += 1;
        Ok(GroupMessage::new(index, ciphertext, signature))
    }
}

impl std::fmt::Debug for OutboundGroupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundGroupSession")
            .field("room_id", &self.room_id)
            .field("session_id", &self.session_id)
            .field("message_index", &self.ratchet.index())
            .finish_non_exhaustive()
    }
}
