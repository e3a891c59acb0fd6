//! The per-device E2EE state machine.
//!
//! [`E2eeMachine`] owns the single lock over all mutable crypto state and
//! the transport handle. Its operations are split across the submodules by
//! concern; each one takes the lock only for synchronous work and never
//! holds it across an `.await`.

mod cipher;
mod publisher;
mod query;
mod replenisher;
mod sessions;
mod store;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use roomseal_crypto::IdentityKeys;
use tokio::sync::Notify;

pub use replenisher::{prekey_replenish_loop, spawn_prekey_replenisher, ReplenishOutcome};
pub use store::CryptoStore;

use crate::config::E2eeConfig;
use crate::error::E2eeError;
use crate::transport::KeyTransport;

/// Counts describing the state of the one-time key pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrekeyStatus {
    pub max: usize,
    pub local: usize,
    pub unpublished: usize,
    pub server_count: Option<u64>,
    pub available: usize,
}

pub struct E2eeMachine {
    user_id: String,
    device_id: String,
    config: E2eeConfig,
    transport: Arc<dyn KeyTransport>,
    /// `None` until `initialize` and after `reset`.
    store: Mutex<Option<CryptoStore>>,
    /// Public identity keys, readable without touching `store`.
    identity: RwLock<Option<IdentityKeys>>,
    replenish: Notify,
}

impl E2eeMachine {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        config: E2eeConfig,
        transport: Arc<dyn KeyTransport>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            config,
            transport,
            store: Mutex::new(None),
            identity: RwLock::new(None),
            replenish: Notify::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn config(&self) -> &E2eeConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.identity.read().is_some()
    }

    /// The device's public keys, `None` before `initialize`.
    pub fn identity_keys(&self) -> Option<IdentityKeys> {
        *self.identity.read()
    }

    /// Create the device identity and publish it with an initial batch of
    /// one-time keys.
    ///
    /// On an already initialized machine the identity is kept and the device
    /// keys are published again. If the upload fails the identity stays in
    /// place and the batch stays unpublished for the next attempt.
    pub async fn initialize(&self) -> Result<IdentityKeys, E2eeError> {
        let keys = {
            // `identity` is only written with `store` held, so the two never disagree.
            let mut guard = self.store.lock();
            let keys = if let Some(store) = guard.as_ref() {
                tracing::debug!(device_id = %self.device_id, "crypto already initialized");
                store.account.identity_keys()
            } else {
                let mut store = CryptoStore::new(self.config.max_one_time_keys);
                let generated = store
                    .account
                    .generate_one_time_keys(self.config.initial_one_time_keys)
                    .len();
                let keys = store.account.identity_keys();
                *guard = Some(store);
                tracing::info!(
                    user_id = %self.user_id,
                    device_id = %self.device_id,
                    one_time_keys = generated,
                    "initialized device identity"
                );
                keys
            };
            *self.identity.write() = Some(keys);
            keys
        };

        self.publish_device_keys().await?;
        Ok(keys)
    }

    /// Drop all crypto state. Key material is wiped as it is dropped.
    pub fn reset(&self) {
        let previous = {
            let mut guard = self.store.lock();
            *self.identity.write() = None;
            guard.take()
        };
        if previous.is_some() {
            tracing::info!(device_id = %self.device_id, "crypto state reset");
        }
    }

    /// Add up to `count` one-time keys without publishing them.
    ///
    /// Keys already on the server count against the ceiling, so the number
    /// generated may be lower than `count`.
    pub fn generate_prekeys(&self, count: usize) -> Result<usize, E2eeError> {
        self.with_store(|store| {
            let room = store
                .account
                .max_one_time_keys()
                .saturating_sub(store.available_one_time_keys());
            let generated = store.account.generate_one_time_keys(count.min(room)).len();
            tracing::debug!(requested = count, generated, "generated one-time keys");
            Ok(generated)
        })
    }

    /// Record a `signed_curve25519` count reported outside of an upload,
    /// for instance by a sync response, and wake the replenisher if it fell.
    pub fn update_one_time_key_count(&self, count: u64) -> Result<(), E2eeError> {
        let dropped = self.with_store(|store| {
            let dropped = store.server_one_time_key_count.is_some_and(|old| count < old);
            store.server_one_time_key_count = Some(count);
            Ok(dropped)
        })?;
        if dropped {
            self.request_replenish();
        }
        Ok(())
    }

    pub fn prekey_status(&self) -> Result<PrekeyStatus, E2eeError> {
        self.with_store(|store| {
            let prekeys = store.account.prekeys();
            Ok(PrekeyStatus {
                max: store.account.max_one_time_keys(),
                local: prekeys.len(),
                unpublished: prekeys.unpublished_count(),
                server_count: store.server_one_time_key_count,
                available: store.available_one_time_keys(),
            })
        })
    }

    /// Run `f` with exclusive access to the crypto state.
    ///
    /// The guard lives only for the call, so `f` must not await.
    pub(crate) fn with_store<T>(
        &self,
        f: impl FnOnce(&mut CryptoStore) -> Result<T, E2eeError>,
    ) -> Result<T, E2eeError> {
        let mut guard = self.store.lock();
        let store = guard.as_mut().ok_or(E2eeError::CryptoNotInitialized)?;
        f(store)
    }

    pub(crate) fn request_replenish(&self) {
        self.replenish.notify_one();
    }

    pub(crate) async fn replenish_requested(&self) {
        self.replenish.notified().await;
    }
}

impl std::fmt::Debug for E2eeMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("E2eeMachine")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
