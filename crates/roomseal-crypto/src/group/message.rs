use ed25519_dalek::{Signature, VerifyingKey};

use crate::encoding;
use crate::error::CryptoError;
use crate::identity::Identity;

/// Wire version byte of group messages.
pub const GROUP_MESSAGE_VERSION: u8 = 3;

const HEADER_LEN: usize = 5;
const TAG_LEN: usize = 16;
const SIGNATURE_LEN: usize = 64;

/// A message encrypted with an outbound group session.
///
/// Wire layout: `version (1) | message_index (4, BE) | ciphertext+tag | signature (64)`.
/// The header is bound as AEAD associated data and the signature, made with the
/// session's signing key, covers everything before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessage {
    message_index: u32,
    ciphertext: Vec<u8>,
    signature: Signature,
}

impl GroupMessage {
    pub(crate) fn new(message_index: u32, ciphertext: Vec<u8>, signature: Signature) -> Self {
        Self {
            message_index,
            ciphertext,
            signature,
        }
    }

    pub(crate) fn header(message_index: u32) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = GROUP_MESSAGE_VERSION;
        header[1..].copy_from_slice(&message_index.to_be_bytes());
        header
    }

    pub fn message_index(&self) -> u32 {
        self.message_index
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    fn signed_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        data.extend_from_slice(&Self::header(self.message_index));
        data.extend_from_slice(&self.ciphertext);
        data
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = self.signed_bytes();
        data.extend_from_slice(&self.signature.to_bytes());
        data
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < HEADER_LEN + TAG_LEN + SIGNATURE_LEN {
            return Err(CryptoError::DecryptionError("group message too short".into()));
        }
        if data[0] != GROUP_MESSAGE_VERSION {
            return Err(CryptoError::DecryptionError(format!(
                "unsupported group message version {}",
                data[0]
            )));
        }

        let message_index = u32::from_be_bytes(
            data[1..HEADER_LEN]
                .try_into()
                .map_err(|_| CryptoError::DecryptionError("invalid message index".into()))?,
        );
        let (body, signature) = data.split_at(data.len() - SIGNATURE_LEN);
        let signature: [u8; SIGNATURE_LEN] = signature
            .try_into()
            .map_err(|_| CryptoError::DecryptionError("invalid signature".into()))?;

        Ok(Self {
            message_index,
            ciphertext: body[HEADER_LEN..].to_vec(),
            signature: Signature::from_bytes(&signature),
        })
    }

    pub fn to_base64(&self) -> String {
        encoding::encode(self.to_bytes())
    }

    pub fn from_base64(input: &str) -> Result<Self, CryptoError> {
        let bytes = encoding::decode(input)
            .map_err(|e| CryptoError::DecryptionError(format!("ciphertext: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Check the session signature. The session id of an outbound group
    /// session is the base64 of the key passed here.
    pub fn verify(&self, session_key: &VerifyingKey) -> Result<(), CryptoError> {
        Identity::verify(session_key, &self.signed_bytes(), &self.signature)
    }
}
