//! The seam between the session machine and the federation key server.

mod memory;

use async_trait::async_trait;

pub use memory::MemoryKeyServer;

use crate::error::TransportError;
use crate::keys::{KeysQueryRequest, KeysQueryResponse, KeysUploadRequest, KeysUploadResponse};

/// Authenticated access to the key-server endpoints.
///
/// Implementations carry their own credentials and base URL. Both calls
/// must be safe to retry.
#[async_trait]
pub trait KeyTransport: Send + Sync {
    /// `POST /keys/upload`
    async fn upload_keys(
        &self,
        request: KeysUploadRequest,
    ) -> Result<KeysUploadResponse, TransportError>;

    /// `POST /keys/query`
    async fn query_keys(
        &self,
        request: KeysQueryRequest,
    ) -> Result<KeysQueryResponse, TransportError>;
}
