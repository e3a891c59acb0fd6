//! Many callers sharing one machine: every encrypt must see its own ratchet
//! position and no caller may observe another's half-finished state.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use roomseal_crypto::encoding;
use roomseal_protocol::{CiphertextEnvelope, E2eeConfig, E2eeMachine, MemoryKeyServer};
use tracing_subscriber::EnvFilter;

const ROOM: &str = "!busy:example.org";

async fn shared_machine() -> Arc<E2eeMachine> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let server = Arc::new(MemoryKeyServer::new());
    let machine = Arc::new(E2eeMachine::new(
        "@alice:example.org",
        "ALICEDEV",
        E2eeConfig::default(),
        server,
    ));
    machine.initialize().await.unwrap();
    machine
}

async fn encrypt_concurrently(
    machine: &Arc<E2eeMachine>,
    room_id: &'static str,
    count: usize,
) -> Vec<CiphertextEnvelope> {
    let tasks = (0..count).map(|i| {
        let machine = machine.clone();
        tokio::spawn(async move { machine.encrypt(room_id, format!("message {i}").as_bytes()) })
    });
    join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_encrypts_get_distinct_indices() {
    const N: usize = 64;
    let machine = shared_machine().await;

    let envelopes = encrypt_concurrently(&machine, ROOM, N).await;

    let session_ids: BTreeSet<&str> = envelopes.iter().map(CiphertextEnvelope::session_id).collect();
    assert_eq!(session_ids.len(), 1);
    let session_key = encoding::ed25519_from_base64(envelopes[0].session_id()).unwrap();

    let mut indices = Vec::with_capacity(N);
    for envelope in &envelopes {
        let message = envelope.group_message().unwrap();
        message.verify(&session_key).unwrap();
        indices.push(message.message_index());
    }
    indices.sort_unstable();
    let expected: Vec<u32> = (0..N as u32).collect();
    assert_eq!(indices, expected);

    let ciphertexts: BTreeSet<&str> = envelopes.iter().map(CiphertextEnvelope::ciphertext).collect();
    assert_eq!(ciphertexts.len(), N);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rooms_advance_independently_under_load() {
    let machine = shared_machine().await;

    let replenish = {
        let machine = machine.clone();
        tokio::spawn(async move {
            for _ in 0..5 {
                machine.ensure_prekeys().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let (first, second) = tokio::join!(
        encrypt_concurrently(&machine, "!a:example.org", 32),
        encrypt_concurrently(&machine, "!b:example.org", 32),
    );
    replenish.await.unwrap();

    for envelopes in [first, second] {
        let mut indices: Vec<u32> = envelopes
            .iter()
            .map(|e| e.group_message().unwrap().message_index())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..32).collect::<Vec<u32>>());
    }
    assert_ne!(
        machine.outbound_group_session_id("!a:example.org").unwrap(),
        machine.outbound_group_session_id("!b:example.org").unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identity_keys_readable_during_encrypts() {
    let machine = shared_machine().await;
    let expected = machine.identity_keys();

    let readers = (0..16).map(|_| {
        let machine = machine.clone();
        tokio::spawn(async move { machine.identity_keys() })
    });
    let (keys, envelopes) = tokio::join!(join_all(readers), encrypt_concurrently(&machine, ROOM, 16));

    assert!(keys.into_iter().all(|k| k.unwrap() == expected));
    assert_eq!(envelopes.len(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn initialize_and_reset_leave_consistent_state() {
    let machine = shared_machine().await;

    for _ in 0..20 {
        let tasks = (0..16).map(|i| {
            let machine = machine.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    machine.reset();
                } else {
                    // A reset racing the upload may fail this; only the final state matters.
                    let _ = machine.initialize().await;
                }
            })
        });
        for joined in join_all(tasks).await {
            joined.unwrap();
        }

        let initialized = machine.prekey_status().is_ok();
        assert_eq!(machine.is_initialized(), initialized);
        assert_eq!(machine.identity_keys().is_some(), initialized);
    }
}
