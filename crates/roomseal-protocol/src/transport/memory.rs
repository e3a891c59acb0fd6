use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::keys::{
    DeviceKeys, KeysQueryRequest, KeysQueryResponse, KeysUploadRequest, KeysUploadResponse,
    SignedOneTimeKey, SIGNED_CURVE25519,
};
use crate::transport::KeyTransport;

#[derive(Default)]
struct DeviceEntry {
    device_keys: Option<DeviceKeys>,
    one_time_keys: BTreeMap<String, SignedOneTimeKey>,
}

/// In-process key server for tests and local development.
///
/// Behaves like a homeserver's key endpoints: device keys are replaced on
/// every upload, one-time keys accumulate until claimed, and each claimed
/// key is handed out once. It can be switched offline or told to fail the
/// next call to exercise error paths.
#[derive(Default)]
pub struct MemoryKeyServer {
    devices: Mutex<HashMap<(String, String), DeviceEntry>>,
    offline: AtomicBool,
    next_failure: Mutex<Option<TransportError>>,
    latency: Mutex<Option<Duration>>,
    uploads: AtomicUsize,
    queries: AtomicUsize,
}

impl MemoryKeyServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next(&self, error: TransportError) {
        *self.next_failure.lock() = Some(error);
    }

    /// Delay every call, so callers can overlap with an in-flight request.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Successful and failed upload attempts.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Unclaimed one-time keys held for a device.
    pub fn one_time_key_count(&self, user_id: &str, device_id: &str) -> usize {
        self.devices
            .lock()
            .get(&(user_id.to_owned(), device_id.to_owned()))
            .map_or(0, |entry| entry.one_time_keys.len())
    }

    pub fn device_keys(&self, user_id: &str, device_id: &str) -> Option<DeviceKeys> {
        self.devices
            .lock()
            .get(&(user_id.to_owned(), device_id.to_owned()))
            .and_then(|entry| entry.device_keys.clone())
    }

    /// Store device keys as if another client had uploaded them.
    pub fn insert_device_keys(&self, device_keys: DeviceKeys) {
        let key = (device_keys.user_id.clone(), device_keys.device_id.clone());
        self.devices.lock().entry(key).or_default().device_keys = Some(device_keys);
    }

    /// Hand out one of a device's one-time keys, removing it from the server.
    pub fn claim_one_time_key(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Option<(String, SignedOneTimeKey)> {
        self.devices
            .lock()
            .get_mut(&(user_id.to_owned(), device_id.to_owned()))?
            .one_time_keys
            .pop_first()
    }

    async fn before_call(&self) -> Result<(), TransportError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Network("key server unreachable".into()));
        }
        match self.next_failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl KeyTransport for MemoryKeyServer {
    async fn upload_keys(
        &self,
        request: KeysUploadRequest,
    ) -> Result<KeysUploadResponse, TransportError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        let Some(device_keys) = request.device_keys else {
            return Err(TransportError::Server {
                errcode: "M_MISSING_PARAM".into(),
                message: "device_keys required".into(),
                retry_after_ms: None,
            });
        };

        let mut devices = self.devices.lock();
        let entry = devices
            .entry((device_keys.user_id.clone(), device_keys.device_id.clone()))
            .or_default();
        entry.device_keys = Some(device_keys);
        entry.one_time_keys.extend(request.one_time_keys);

        let count = entry
            .one_time_keys
            .keys()
            .filter(|id| id.starts_with(SIGNED_CURVE25519))
            .count() as u64;
        Ok(KeysUploadResponse {
            one_time_key_counts: BTreeMap::from([(SIGNED_CURVE25519.to_owned(), count)]),
        })
    }

    async fn query_keys(
        &self,
        request: KeysQueryRequest,
    ) -> Result<KeysQueryResponse, TransportError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        let devices = self.devices.lock();
        let mut response = KeysQueryResponse::default();
        for (user_id, wanted) in request.device_keys {
            let found: BTreeMap<String, DeviceKeys> = devices
                .iter()
                .filter(|((user, device), _)| {
                    *user == user_id && (wanted.is_empty() || wanted.contains(device))
                })
                .filter_map(|((_, device), entry)| {
                    entry.device_keys.clone().map(|keys| (device.clone(), keys))
                })
                .collect();
            response.device_keys.insert(user_id, found);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use roomseal_crypto::Account;

    use super::*;

    fn upload(account: &Account, one_time: &[&str]) -> KeysUploadRequest {
        KeysUploadRequest {
            device_keys: Some(DeviceKeys::signed(account, "@bob:example.org", "BOB").unwrap()),
            one_time_keys: one_time
                .iter()
                .map(|id| {
                    (
                        format!("{SIGNED_CURVE25519}:{id}"),
                        SignedOneTimeKey {
                            key: (*id).to_owned(),
                            signatures: BTreeMap::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn upload_reports_counts_and_claims_once() {
        let server = MemoryKeyServer::new();
        let account = Account::new(10);

        let response = server.upload_keys(upload(&account, &["a", "b"])).await.unwrap();
        assert_eq!(response.signed_curve25519_count(), Some(2));

        let (first, _) = server.claim_one_time_key("@bob:example.org", "BOB").unwrap();
        let (second, _) = server.claim_one_time_key("@bob:example.org", "BOB").unwrap();
        assert_ne!(first, second);
        assert!(server.claim_one_time_key("@bob:example.org", "BOB").is_none());
        assert_eq!(server.upload_count(), 1);
    }

    #[tokio::test]
    async fn offline_server_fails_with_network_error() {
        let server = MemoryKeyServer::new();
        server.set_offline(true);
        let err = server
            .upload_keys(upload(&Account::new(1), &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
        assert_eq!(server.one_time_key_count("@bob:example.org", "BOB"), 0);
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let server = MemoryKeyServer::new();
        server.fail_next(TransportError::Server {
            errcode: "M_LIMIT_EXCEEDED".into(),
            message: "slow down".into(),
            retry_after_ms: Some(100),
        });
        let request = KeysQueryRequest::for_users(&["@bob:example.org".into()], 10);
        assert!(server.query_keys(request.clone()).await.is_err());
        assert!(server.query_keys(request).await.is_ok());
        assert_eq!(server.query_count(), 2);
    }

    #[tokio::test]
    async fn query_returns_uploaded_devices() {
        let server = MemoryKeyServer::new();
        let account = Account::new(1);
        server.upload_keys(upload(&account, &[])).await.unwrap();

        let response = server
            .query_keys(KeysQueryRequest::for_users(&["@bob:example.org".into()], 10))
            .await
            .unwrap();
        let devices = &response.device_keys["@bob:example.org"];
        assert_eq!(devices.len(), 1);
        assert_eq!(devices["BOB"].device_id, "BOB");
    }
}
