use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::E2eeError;
use crate::machine::E2eeMachine;

/// What a replenishment round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplenishOutcome {
    /// Enough keys were available and nothing was pending upload.
    Healthy,
    Published { generated: usize, published: usize },
}

impl E2eeMachine {
    /// Top the one-time key pool up to the ceiling once it falls below half,
    /// and upload anything not yet published.
    ///
    /// Calling this on a healthy pool does not touch the network.
    pub async fn ensure_prekeys(&self) -> Result<ReplenishOutcome, E2eeError> {
        let (generated, pending) = self.with_store(|store| {
            let max = store.account.max_one_time_keys();
            let available = store.available_one_time_keys();
            let generated = if available < max / 2 {
                let generated = store.account.generate_one_time_keys(max - available).len();
                tracing::debug!(available, max, generated, "one-time key pool below half");
                generated
            } else {
                0
            };
            Ok((generated, store.account.prekeys().unpublished_count()))
        })?;

        if pending == 0 {
            return Ok(ReplenishOutcome::Healthy);
        }
        let published = self.publish_device_keys().await?;
        Ok(ReplenishOutcome::Published {
            generated,
            published,
        })
    }
}

/// Background prekey replenishment.
///
/// Runs `ensure_prekeys` on the configured interval and whenever an encrypt
/// asks for it. Shuts down when `shutdown_rx` fires or its sender is dropped.
pub async fn prekey_replenish_loop(machine: Arc<E2eeMachine>, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut interval = tokio::time::interval(machine.config().replenish_interval());

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = machine.replenish_requested() => {}
            _ = shutdown_rx.recv() => break,
        }

        match machine.ensure_prekeys().await {
            Ok(ReplenishOutcome::Healthy) => {}
            Ok(ReplenishOutcome::Published {
                generated,
                published,
            }) => {
                tracing::info!(generated, published, "replenished one-time keys");
            }
            Err(E2eeError::CryptoNotInitialized) => {
                tracing::debug!("prekey replenisher waiting for initialization");
            }
            Err(e) => {
                tracing::warn!(error = %e, retryable = e.is_retryable(), "prekey replenishment failed");
            }
        }
    }

    tracing::debug!("prekey replenisher stopped");
}

/// Spawn [`prekey_replenish_loop`] on the current runtime and return its
/// shutdown handle.
pub fn spawn_prekey_replenisher(machine: Arc<E2eeMachine>) -> mpsc::Sender<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tracing::info!(device_id = %machine.device_id(), "prekey replenisher started");
    tokio::spawn(prekey_replenish_loop(machine, shutdown_rx));
    shutdown_tx
}
