pub mod message;
pub mod session;
pub mod store;

pub use message::{NormalMessage, PairwiseMessage, PreKeyMessage};
pub use session::PairwiseSession;
pub use store::PairwiseSessionStore;
