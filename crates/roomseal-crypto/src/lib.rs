pub mod account;
pub mod canonical;
pub mod encoding;
pub mod error;
pub mod group;
pub mod identity;
pub mod pairwise;
pub mod prekeys;
mod ratchet;

pub use account::Account;
pub use error::CryptoError;
pub use group::{GroupMessage, GroupSessionManager, OutboundGroupSession, RotationPolicy};
pub use identity::{Identity, IdentityKeys};
pub use pairwise::{PairwiseMessage, PairwiseSession, PairwiseSessionStore, PreKeyMessage};
pub use prekeys::{KeyId, PrekeyPool};

pub use ed25519_dalek::VerifyingKey as Ed25519PublicKey;
pub use x25519_dalek::PublicKey as Curve25519PublicKey;
