pub mod config;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod machine;
pub mod transport;

pub use config::E2eeConfig;
pub use envelope::CiphertextEnvelope;
pub use error::{E2eeError, TransportError};
pub use keys::{DeviceKeys, KeysQueryRequest, KeysQueryResponse, KeysUploadRequest, KeysUploadResponse};
pub use machine::{spawn_prekey_replenisher, E2eeMachine, PrekeyStatus, ReplenishOutcome};
pub use transport::{KeyTransport, MemoryKeyServer};
