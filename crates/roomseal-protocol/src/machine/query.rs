use std::collections::BTreeMap;

use crate::error::E2eeError;
use crate::keys::{DeviceKeys, KeysQueryRequest};
use crate::machine::E2eeMachine;

impl E2eeMachine {
    /// Fetch the device keys of `user_ids` from the key server.
    ///
    /// Devices whose keys are filed under the wrong user or device id, or
    /// whose self-signature does not verify, are dropped from the result.
    pub async fn query_device_keys(
        &self,
        user_ids: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, DeviceKeys>>, E2eeError> {
        if user_ids.is_empty() {
            return Err(E2eeError::InvalidArgument("user list must not be empty".into()));
        }
        if !self.is_initialized() {
            return Err(E2eeError::CryptoNotInitialized);
        }

        let request = KeysQueryRequest::for_users(user_ids, self.config.key_query_timeout_ms);
        let response = self.transport.query_keys(request).await.map_err(|e| {
            tracing::warn!(error = %e, users = user_ids.len(), "device key query failed");
            E2eeError::from(e)
        })?;

        for (user_id, failure) in &response.failures {
            tracing::warn!(server = %user_id, ?failure, "key query failure reported");
        }

        let mut verified = BTreeMap::new();
        for (user_id, devices) in response.device_keys {
            let mut kept = BTreeMap::new();
            for (device_id, keys) in devices {
                if keys.user_id != user_id || keys.device_id != device_id {
                    tracing::warn!(%user_id, %device_id, "device keys filed under the wrong id");
                    continue;
                }
                if let Err(e) = keys.verify_self_signature() {
                    tracing::warn!(%user_id, %device_id, error = %e, "dropping device with invalid signature");
                    continue;
                }
                kept.insert(device_id, keys);
            }
            verified.insert(user_id, kept);
        }
        Ok(verified)
    }
}
