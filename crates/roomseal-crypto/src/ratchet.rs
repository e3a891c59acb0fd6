use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

const MESSAGE_KEY_INFO: &[u8] = b"RoomsealMessageKeys";
const CHAIN_KEY_INFO: &[u8] = b"RoomsealChainKey";

/// Key and nonce for exactly one message.
#[derive(ZeroizeOnDrop)]
pub(crate) struct MessageKeys {
    pub(crate) key: [u8; 32],
    pub(crate) nonce: [u8; 12],
}

/// One-way symmetric chain: each step derives the keys for the current index
/// and replaces the chain key, so earlier message keys cannot be recomputed
/// from later state.
#[derive(Clone, ZeroizeOnDrop)]
pub(crate) struct HashRatchet {
    chain_key: [u8; 32],
    #[zeroize(skip)]
    index: u32,
}

impl HashRatchet {
    pub(crate) fn random() -> Self {
        let mut chain_key = [0u8; 32];
        OsRng.fill_bytes(&mut chain_key);
        Self::from_chain_key(chain_key)
    }

    pub(crate) fn from_chain_key(chain_key: [u8; 32]) -> Self {
        Self {
            chain_key,
            index: 0,
        }
    }

    /// Index of the next message this ratchet will produce keys for.
    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    /// Derive keys for the current index and step the chain forward.
    pub(crate) fn advance(&mut self) -> Result<MessageKeys, CryptoError> {
        let next_index = self
            .index
            .checked_add(1)
            .ok_or_else(|| CryptoError::SessionError("ratchet index exhausted".into()))?;

        let hk = Hkdf::<Sha256>::new(None, &self.chain_key);
        let mut okm = [0u8; 44];
        hk.expand(MESSAGE_KEY_INFO, &mut okm)
            .map_err(|e| CryptoError::SessionError(format!("HKDF expand failed: {e}")))?;
        let mut next_chain_key = [0u8; 32];
        hk.expand(CHAIN_KEY_INFO, &mut next_chain_key)
            .map_err(|e| CryptoError::SessionError(format!("HKDF expand failed: {e}")))?;

        let mut keys = MessageKeys {
            key: [0u8; 32],
            nonce: [0u8; 12],
        };
        keys.key.copy_from_slice(&okm[..32]);
        keys.nonce.copy_from_slice(&okm[32..]);
        okm.zeroize();

        self.chain_key.zeroize();
        self.chain_key = next_chain_key;
        next_chain_key.zeroize();
        self.index = next_index;

        Ok(keys)
    }

    /// Step forward until `index`, discarding the skipped keys.
    pub(crate) fn advance_to(&mut self, index: u32) -> Result<(), CryptoError> {
        if index < self.index {
            return Err(CryptoError::SessionError(format!(
                "cannot rewind ratchet from {} to {index}",
                self.index
            )));
        }
        while self.index < index {
            self.advance()?;
        }
        Ok(())
    }
}
