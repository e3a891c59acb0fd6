use std::collections::BTreeMap;

use ed25519_dalek::Signature;
use serde_json::Value;
use x25519_dalek::PublicKey as Curve25519PublicKey;

use crate::canonical;
use crate::error::CryptoError;
use crate::identity::{Identity, IdentityKeys};
use crate::pairwise::{PairwiseMessage, PairwiseSession, PreKeyMessage};
use crate::prekeys::{KeyId, PrekeyPool};

/// A device's identity together with its one-time key pool.
///
/// This is the root of all local key material: every other component
/// borrows from it and nothing hands out its private keys.
#[derive(Debug)]
pub struct Account {
    identity: Identity,
    prekeys: PrekeyPool,
}

impl Account {
    /// Generate a fresh identity with an empty pool of the given capacity.
    pub fn new(max_one_time_keys: usize) -> Self {
        let identity = Identity::generate();
        tracing::debug!(fingerprint = %identity.fingerprint(), "generated device identity");
        Self {
            identity,
            prekeys: PrekeyPool::new(max_one_time_keys),
        }
    }

    pub fn identity_keys(&self) -> IdentityKeys {
        self.identity.public_keys()
    }

    pub fn max_one_time_keys(&self) -> usize {
        self.prekeys.capacity()
    }

    /// Add up to `count` one-time keys, bounded by the pool capacity.
    pub fn generate_one_time_keys(&mut self, count: usize) -> Vec<KeyId> {
        self.prekeys.generate(count)
    }

    /// One-time keys that have not been uploaded yet.
    pub fn one_time_keys(&self) -> BTreeMap<KeyId, Curve25519PublicKey> {
        self.prekeys.unpublished()
    }

    /// Mark a successfully uploaded batch as published.
    pub fn mark_published(&mut self, ids: &[KeyId]) -> usize {
        self.prekeys.mark_published(ids)
    }

    pub fn mark_keys_as_published(&mut self) -> usize {
        self.prekeys.mark_all_published()
    }

    pub fn prekeys(&self) -> &PrekeyPool {
        &self.prekeys
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.identity.sign(message)
    }

    /// Sign a JSON object as `signatures.<user_id>.ed25519:<device_id>`.
    pub fn sign_json(
        &self,
        user_id: &str,
        device_id: &str,
        value: &mut Value,
    ) -> Result<(), CryptoError> {
        canonical::sign_json(&self.identity, user_id, &format!("ed25519:{device_id}"), value)
    }

    /// Start a pairwise session with a remote device from its identity key
    /// and one of its claimed one-time keys.
    pub fn create_outbound_session(
        &self,
        remote_identity_key: Curve25519PublicKey,
        remote_one_time_key: Curve25519PublicKey,
    ) -> Result<PairwiseSession, CryptoError> {
        PairwiseSession::outbound(&self.identity, remote_identity_key, remote_one_time_key)
    }

    /// Accept a pairwise session from a pre-key message, consuming the
    /// one-time key it names. Returns the session and the first plaintext.
    ///
    /// The one-time key is only removed from the pool once the message has
    /// decrypted, so a forged pre-key message cannot burn our keys.
    pub fn create_inbound_session(
        &mut self,
        remote_identity_key: Curve25519PublicKey,
        message: &PreKeyMessage,
    ) -> Result<(PairwiseSession, Vec<u8>), CryptoError> {
        if message.identity_key != remote_identity_key.to_bytes() {
            return Err(CryptoError::SessionError(
                "pre-key message was not sent by the expected identity".into(),
            ));
        }

        let one_time_key = Curve25519PublicKey::from(message.one_time_key);
        let secret = self
            .prekeys
            .secret_for(&one_time_key)
            .ok_or_else(|| CryptoError::PreKeyError("unknown or already consumed one-time key".into()))?;
        let mut session = PairwiseSession::inbound(&self.identity, secret, message)?;
        let plaintext = session.decrypt(&PairwiseMessage::PreKey(message.clone()))?;

        self.prekeys.remove(&one_time_key);
        tracing::debug!(session_id = session.session_id(), "consumed one-time key for inbound session");
        Ok((session, plaintext))
    }
}
