pub mod manager;
pub mod message;
pub mod session;

pub use manager::GroupSessionManager;
pub use message::{GroupMessage, GROUP_MESSAGE_VERSION};
pub use session::{OutboundGroupSession, RotationPolicy};
