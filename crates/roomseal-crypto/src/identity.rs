use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as Curve25519PublicKey, SharedSecret, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::encoding;
use crate::error::CryptoError;

/// A device's long-term cryptographic identity.
///
/// Two independent keypairs: an Ed25519 key that signs this device's key
/// attestations, and an X25519 key used for key agreement when other devices
/// establish pairwise sessions with us. Neither secret ever leaves this type;
/// both are wiped when it is dropped.
#[derive(ZeroizeOnDrop)]
pub struct Identity {
    signing_key: SigningKey,
    agreement_secret: StaticSecret,
}

/// The public halves of an [`Identity`], safe to publish and to copy around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityKeys {
    pub ed25519: VerifyingKey,
    pub curve25519: Curve25519PublicKey,
}

impl IdentityKeys {
    pub fn ed25519_base64(&self) -> String {
        encoding::encode(self.ed25519.as_bytes())
    }

    pub fn curve25519_base64(&self) -> String {
        encoding::encode(self.curve25519.as_bytes())
    }
}

impl Identity {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            agreement_secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn public_keys(&self) -> IdentityKeys {
        IdentityKeys {
            ed25519: self.signing_key.verifying_key(),
            curve25519: Curve25519PublicKey::from(&self.agreement_secret),
        }
    }

    /// Sign a message with the long-term signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Verify a signature against a public key.
    pub fn verify(
        public_key: &VerifyingKey,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), CryptoError> {
        public_key
            .verify(message, signature)
            .map_err(|e| CryptoError::VerificationError(e.to_string()))
    }

    /// X25519 agreement between our long-term key and a remote public key.
    pub(crate) fn diffie_hellman(&self, their_public: &Curve25519PublicKey) -> SharedSecret {
        self.agreement_secret.diffie_hellman(their_public)
    }

    /// Hex fingerprint of the signing key, for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}
