use std::collections::BTreeMap;

use roomseal_crypto::{encoding, KeyId};
use serde_json::json;

use crate::error::E2eeError;
use crate::keys::{DeviceKeys, KeysUploadRequest, SignedOneTimeKey, SIGNED_CURVE25519};
use crate::machine::E2eeMachine;

impl E2eeMachine {
    /// Upload the signed device keys with every unpublished one-time key.
    ///
    /// The request is assembled under the lock, sent without it, and only
    /// the keys that were actually in the request are marked published
    /// afterwards. Keys generated while the upload was in flight stay
    /// pending for the next round. Returns how many keys were published.
    pub async fn publish_device_keys(&self) -> Result<usize, E2eeError> {
        let (request, batch, identity) = self.with_store(|store| {
            let account = &store.account;
            let device_keys = DeviceKeys::signed(account, &self.user_id, &self.device_id)?;

            let mut one_time_keys = BTreeMap::new();
            let mut batch: Vec<KeyId> = Vec::new();
            for (id, public) in account.one_time_keys() {
                let mut value = json!({ "key": encoding::encode(public.as_bytes()) });
                account.sign_json(&self.user_id, &self.device_id, &mut value)?;
                let signed: SignedOneTimeKey = serde_json::from_value(value)
                    .map_err(|e| E2eeError::CryptoOperationFailed(e.to_string()))?;
                one_time_keys.insert(format!("{SIGNED_CURVE25519}:{}", id.to_base64()), signed);
                batch.push(id);
            }

            let request = KeysUploadRequest {
                device_keys: Some(device_keys),
                one_time_keys,
            };
            Ok((request, batch, account.identity_keys()))
        })?;

        tracing::debug!(one_time_keys = batch.len(), "uploading device keys");
        let response = match self.transport.upload_keys(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, pending = batch.len(), "key upload failed");
                return Err(e.into());
            }
        };

        self.with_store(|store| {
            // A reset (and possibly a new identity) while the upload was in
            // flight leaves nothing of ours to mark.
            if store.account.identity_keys() != identity {
                return Err(E2eeError::CryptoNotInitialized);
            }
            let published = store.account.mark_published(&batch);
            if let Some(count) = response.signed_curve25519_count() {
                store.server_one_time_key_count = Some(count);
            }
            tracing::info!(
                published,
                server_count = ?store.server_one_time_key_count,
                "published device keys"
            );
            Ok(published)
        })
    }
}
