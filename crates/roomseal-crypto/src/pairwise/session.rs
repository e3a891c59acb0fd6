use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as Curve25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::encoding;
use crate::error::CryptoError;
use crate::identity::Identity;
use crate::pairwise::message::{session_hash, NormalMessage, PairwiseMessage, PreKeyMessage};
use crate::ratchet::HashRatchet;

const X3DH_INFO: &[u8] = b"RoomsealPairwise3DH";

/// How far ahead of the receiving chain an incoming index may be.
const MAX_SKIP: u32 = 1000;

/// Public keys the initiator repeats on every message until the responder
/// has replied once.
#[derive(Clone, Copy)]
struct PreKeyHeader {
    identity_key: [u8; 32],
    base_key: [u8; 32],
    one_time_key: [u8; 32],
}

/// A one-to-one encrypted channel with another device.
///
/// Established by triple Diffie-Hellman over our long-term key, the remote's
/// long-term key, a fresh base key, and one of the remote's one-time keys.
/// Each direction then runs its own symmetric hash ratchet; messages are
/// sealed with ChaCha20-Poly1305.
pub struct PairwiseSession {
    session_id: String,
    session_hash: [u8; 32],
    remote_identity_key: Curve25519PublicKey,
    sending: HashRatchet,
    receiving: HashRatchet,
    prekey_header: Option<PreKeyHeader>,
    received_message: bool,
}

impl PairwiseSession {
    /// Initiator side.
    pub(crate) fn outbound(
        identity: &Identity,
        remote_identity_key: Curve25519PublicKey,
        remote_one_time_key: Curve25519PublicKey,
    ) -> Result<Self, CryptoError> {
        let base_secret = StaticSecret::random_from_rng(OsRng);
        let base_key = Curve25519PublicKey::from(&base_secret);

        let dh1 = identity.diffie_hellman(&remote_one_time_key);
        let dh2 = base_secret.diffie_hellman(&remote_identity_key);
        let dh3 = base_secret.diffie_hellman(&remote_one_time_key);
        let (initiator_chain, responder_chain) =
            derive_chains(&[dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes()])?;

        let header = PreKeyHeader {
            identity_key: identity.public_keys().curve25519.to_bytes(),
            base_key: base_key.to_bytes(),
            one_time_key: remote_one_time_key.to_bytes(),
        };
        let hash = session_hash(&header.identity_key, &header.base_key, &header.one_time_key);

        Ok(Self {
            session_id: encoding::encode(hash),
            session_hash: hash,
            remote_identity_key,
            sending: initiator_chain,
            receiving: responder_chain,
            prekey_header: Some(header),
            received_message: false,
        })
    }

    /// Responder side, from the first pre-key message. `one_time_secret` is
    /// the already-consumed secret matching `message.one_time_key`.
    pub(crate) fn inbound(
        identity: &Identity,
        one_time_secret: &StaticSecret,
        message: &PreKeyMessage,
    ) -> Result<Self, CryptoError> {
        let their_identity = Curve25519PublicKey::from(message.identity_key);
        let their_base = Curve25519PublicKey::from(message.base_key);

        let dh1 = one_time_secret.diffie_hellman(&their_identity);
        let dh2 = identity.diffie_hellman(&their_base);
        let dh3 = one_time_secret.diffie_hellman(&their_base);
        let (initiator_chain, responder_chain) =
            derive_chains(&[dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes()])?;

        let hash = session_hash(&message.identity_key, &message.base_key, &message.one_time_key);

        Ok(Self {
            session_id: encoding::encode(hash),
            session_hash: hash,
            remote_identity_key: their_identity,
            // Responder swaps sending/receiving relative to initiator
            sending: responder_chain,
            receiving: initiator_chain,
            prekey_header: None,
            received_message: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn remote_identity_key(&self) -> Curve25519PublicKey {
        self.remote_identity_key
    }

    pub fn has_received_message(&self) -> bool {
        self.received_message
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<PairwiseMessage, CryptoError> {
        let index = self.sending.index();
        let keys = self.sending.advance()?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&keys.key));
        let aad = self.associated_data(index);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&keys.nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        let body = NormalMessage { index, ciphertext };
        Ok(match self.prekey_header {
            Some(header) => PairwiseMessage::PreKey(PreKeyMessage {
                identity_key: header.identity_key,
                base_key: header.base_key,
                one_time_key: header.one_time_key,
                message: body,
            }),
            None => PairwiseMessage::Normal(body),
        })
    }

    /// Decrypt a message from the remote device.
    ///
    /// Messages must arrive in order; keys for skipped indices are discarded.
    /// The ratchet only moves if authentication succeeds.
    pub fn decrypt(&mut self, message: &PairwiseMessage) -> Result<Vec<u8>, CryptoError> {
        if let PairwiseMessage::PreKey(m) = message {
            if m.session_id() != self.session_id {
                return Err(CryptoError::SessionError(
                    "pre-key message belongs to a different session".into(),
                ));
            }
        }
        let body = message.body();

        let expected = self.receiving.index();
        if body.index < expected {
            return Err(CryptoError::DecryptionError(format!(
                "message index {} already used",
                body.index
            )));
        }
        if body.index - expected > MAX_SKIP {
            return Err(CryptoError::DecryptionError(format!(
                "message index {} too far ahead of {expected}",
                body.index
            )));
        }

        let mut chain = self.receiving.clone();
        chain.advance_to(body.index)?;
        let keys = chain.advance()?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&keys.key));
        let aad = self.associated_data(body.index);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&keys.nonce),
                Payload {
                    msg: &body.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|e| CryptoError::DecryptionError(e.to_string()))?;

        self.receiving = chain;
        self.received_message = true;
        self.prekey_header = None;
        Ok(plaintext)
    }

    fn associated_data(&self, index: u32) -> [u8; 36] {
        let mut aad = [0u8; 36];
        aad[..32].copy_from_slice(&self.session_hash);
        aad[32..].copy_from_slice(&index.to_be_bytes());
        aad
    }
}

impl std::fmt::Debug for PairwiseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairwiseSession")
            .field("session_id", &self.session_id)
            .field("remote_identity_key", &encoding::encode(self.remote_identity_key.as_bytes()))
            .field("received_message", &self.received_message)
            .finish_non_exhaustive()
    }
}

/// HKDF over the concatenated shared secrets into the initiator->responder
/// and responder->initiator chains.
fn derive_chains(shared: &[&[u8; 32]; 3]) -> Result<(HashRatchet, HashRatchet), CryptoError> {
    let mut ikm = [0u8; 96];
    for (i, secret) in shared.iter().enumerate() {
        ikm[i * 32..(i + 1) * 32].copy_from_slice(*secret);
    }

    let hk = Hkdf::<Sha256>::new(None, &ikm);
    ikm.zeroize();
    let mut okm = [0u8; 64];
    hk.expand(X3DH_INFO, &mut okm)
        .map_err(|e| CryptoError::SessionError(format!("HKDF expand failed: {e}")))?;

    let mut initiator = [0u8; 32];
    let mut responder = [0u8; 32];
    initiator.copy_from_slice(&okm[..32]);
    responder.copy_from_slice(&okm[32..]);
    okm.zeroize();

    let chains = (
        HashRatchet::from_chain_key(initiator),
        HashRatchet::from_chain_key(responder),
    );
    initiator.zeroize();
    responder.zeroize();
    Ok(chains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;

    /// Alice opens a session to Bob using one of Bob's one-time keys, and Bob
    /// accepts it from Alice's first message.
    fn established() -> (Account, PairwiseSession, Account, PairwiseSession) {
        let alice = Account::new(10);
        let mut bob = Account::new(10);
        let ids = bob.generate_one_time_keys(1);
        let otk = bob.one_time_keys()[&ids[0]];

        let mut outbound = alice
            .create_outbound_session(bob.identity_keys().curve25519, otk)
            .unwrap();
        let first = outbound.encrypt(b"hello bob").unwrap();
        let PairwiseMessage::PreKey(prekey) = first else {
            panic!("first message must carry the pre-key header");
        };
        let (inbound, plaintext) = bob
            .create_inbound_session(alice.identity_keys().curve25519, &prekey)
            .unwrap();
        assert_eq!(plaintext, b"hello bob");

        (alice, outbound, bob, inbound)
    }

    #[test]
    fn both_sides_agree_on_session_id() {
        let (_, outbound, _, inbound) = established();
        assert_eq!(outbound.session_id(), inbound.session_id());
        assert!(inbound.has_received_message());
        assert!(!outbound.has_received_message());
    }

    #[test]
    fn prekey_header_repeats_until_reply() {
        let (_, mut outbound, _, mut inbound) = established();

        let second = outbound.encrypt(b"still waiting").unwrap();
        assert!(second.is_prekey());
        assert_eq!(inbound.decrypt(&second).unwrap(), b"still waiting");

        let reply = inbound.encrypt(b"hi alice").unwrap();
        assert!(!reply.is_prekey());
        assert_eq!(outbound.decrypt(&reply).unwrap(), b"hi alice");

        let third = outbound.encrypt(b"now normal").unwrap();
        assert!(!third.is_prekey());
        assert_eq!(inbound.decrypt(&third).unwrap(), b"now normal");
    }

    #[test]
    fn replayed_message_is_rejected() {
        let (_, mut outbound, _, mut inbound) = established();
        let reply = inbound.encrypt(b"once").unwrap();

        assert!(outbound.decrypt(&reply).is_ok());
        assert!(matches!(
            outbound.decrypt(&reply),
            Err(CryptoError::DecryptionError(_))
        ));
    }

    #[test]
    fn skipped_messages_are_tolerated() {
        let (_, mut outbound, _, mut inbound) = established();
        let _lost = inbound.encrypt(b"lost").unwrap();
        let kept = inbound.encrypt(b"kept").unwrap();

        assert_eq!(outbound.decrypt(&kept).unwrap(), b"kept");
    }

    #[test]
    fn tampered_ciphertext_leaves_ratchet_untouched() {
        let (_, mut outbound, _, mut inbound) = established();
        let reply = inbound.encrypt(b"payload").unwrap();

        let mut tampered = reply.clone();
        if let PairwiseMessage::Normal(body) = &mut tampered {
            body.ciphertext[0] ^= 0xff;
        }
        assert!(outbound.decrypt(&tampered).is_err());
        assert!(!outbound.has_received_message());
        assert_eq!(outbound.decrypt(&reply).unwrap(), b"payload");
    }

    #[test]
    fn prekey_message_for_other_session_is_rejected() {
        let (alice, mut first, mut bob, _) = established();
        let ids = bob.generate_one_time_keys(1);
        let otk = bob.one_time_keys()[&ids[0]];
        let mut second = alice
            .create_outbound_session(bob.identity_keys().curve25519, otk)
            .unwrap();
        let (mut second_inbound, _) = match second.encrypt(b"x").unwrap() {
            PairwiseMessage::PreKey(m) => bob
                .create_inbound_session(alice.identity_keys().curve25519, &m)
                .unwrap(),
            PairwiseMessage::Normal(_) => panic!("expected pre-key message"),
        };

        let stray = first.encrypt(b"wrong session").unwrap();
        assert!(matches!(
            second_inbound.decrypt(&stray),
            Err(CryptoError::SessionError(_))
        ));
    }

    #[test]
    fn pairwise_message_serializes_with_type_tag() {
        let (_, mut outbound, _, _) = established();
        let message = outbound.encrypt(b"json").unwrap();
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "PreKey");

        let parsed: PairwiseMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, message);
    }
}
