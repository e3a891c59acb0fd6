//! Key-server request and response bodies.
//!
//! Field names follow the federation key-management API so these types
//! serialize straight onto `/keys/upload` and `/keys/query`.

use std::collections::BTreeMap;

use roomseal_crypto::{canonical, encoding, Account, Ed25519PublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::E2eeError;

/// Pairwise (to-device) algorithm advertised in device keys.
pub const OLM_ALGORITHM: &str = "m.olm.v1.curve25519-aes-sha2";
/// Room message algorithm stamped on ciphertext envelopes.
pub const MEGOLM_ALGORITHM: &str = "m.megolm.v1.aes-sha2";
/// Key type under which one-time keys are uploaded and counted.
pub const SIGNED_CURVE25519: &str = "signed_curve25519";

/// Default `timeout` hint for key queries, in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

pub type Signatures = BTreeMap<String, BTreeMap<String, String>>;

/// A device's self-signed attestation of its identity keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceKeys {
    pub user_id: String,
    pub device_id: String,
    pub algorithms: Vec<String>,
    pub keys: BTreeMap<String, String>,
    #[serde(default)]
    pub signatures: Signatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
}

impl DeviceKeys {
    /// Build and sign the attestation for `account`'s identity keys.
    pub fn signed(account: &Account, user_id: &str, device_id: &str) -> Result<Self, E2eeError> {
        let identity = account.identity_keys();
        let keys = BTreeMap::from([
            (format!("curve25519:{device_id}"), identity.curve25519_base64()),
            (format!("ed25519:{device_id}"), identity.ed25519_base64()),
        ]);
        let unsigned = Self {
            user_id: user_id.to_owned(),
            device_id: device_id.to_owned(),
            algorithms: vec![OLM_ALGORITHM.to_owned(), MEGOLM_ALGORITHM.to_owned()],
            keys,
            signatures: Signatures::new(),
            unsigned: None,
        };

        let mut value = to_value(&unsigned)?;
        account.sign_json(user_id, device_id, &mut value)?;
        from_value(value)
    }

    pub fn ed25519_key(&self) -> Option<&str> {
        self.keys
            .get(&format!("ed25519:{}", self.device_id))
            .map(String::as_str)
    }

    pub fn curve25519_key(&self) -> Option<&str> {
        self.keys
            .get(&format!("curve25519:{}", self.device_id))
            .map(String::as_str)
    }

    /// Check the device's signature over its own keys.
    pub fn verify_self_signature(&self) -> Result<(), E2eeError> {
        let key = self.ed25519_key().ok_or_else(|| {
            E2eeError::CryptoOperationFailed(format!("device {} has no ed25519 key", self.device_id))
        })?;
        let key: Ed25519PublicKey = encoding::ed25519_from_base64(key)?;
        canonical::verify_json(
            &key,
            &self.user_id,
            &format!("ed25519:{}", self.device_id),
            &to_value(self)?,
        )?;
        Ok(())
    }
}

/// A one-time key signed by the uploading device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOneTimeKey {
    pub key: String,
    #[serde(default)]
    pub signatures: Signatures,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeysUploadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_keys: Option<DeviceKeys>,
    /// `signed_curve25519:<key_id>` -> signed key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub one_time_keys: BTreeMap<String, SignedOneTimeKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysUploadResponse {
    #[serde(default)]
    pub one_time_key_counts: BTreeMap<String, u64>,
}

impl KeysUploadResponse {
    pub fn signed_curve25519_count(&self) -> Option<u64> {
        self.one_time_key_counts.get(SIGNED_CURVE25519).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysQueryRequest {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// User id -> device ids; an empty list asks for every device.
    pub device_keys: BTreeMap<String, Vec<String>>,
}

fn default_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_MS
}

impl KeysQueryRequest {
    pub fn for_users(user_ids: &[String], timeout: u64) -> Self {
        Self {
            timeout,
            device_keys: user_ids.iter().map(|u| (u.clone(), Vec::new())).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeysQueryResponse {
    #[serde(default)]
    pub device_keys: BTreeMap<String, BTreeMap<String, DeviceKeys>>,
    #[serde(default)]
    pub failures: BTreeMap<String, Value>,
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, E2eeError> {
    serde_json::to_value(value).map_err(|e| E2eeError::CryptoOperationFailed(e.to_string()))
}

fn from_value<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, E2eeError> {
    serde_json::from_value(value).map_err(|e| E2eeError::CryptoOperationFailed(e.to_string()))
}
