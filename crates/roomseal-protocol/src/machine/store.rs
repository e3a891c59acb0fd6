use roomseal_crypto::{Account, GroupSessionManager, PairwiseSessionStore};

/// Everything that changes while a device is logged in.
///
/// Only ever reached through the machine's lock, so group ratchets and the
/// prekey pool are never advanced by two callers at once.
#[derive(Debug)]
pub struct CryptoStore {
    pub account: Account,
    pub groups: GroupSessionManager,
    pub pairwise: PairwiseSessionStore,
    /// Last `signed_curve25519` count the key server reported.
    pub server_one_time_key_count: Option<u64>,
}

impl CryptoStore {
    pub fn new(max_one_time_keys: usize) -> Self {
        Self {
            account: Account::new(max_one_time_keys),
            groups: GroupSessionManager::new(),
            pairwise: PairwiseSessionStore::new(),
            server_one_time_key_count: None,
        }
    }

    /// One-time keys other devices can still use or will soon be able to.
    ///
    /// Keys held by the server plus keys waiting for upload. Before the
    /// server has reported a count, the local pool size is the best guess.
    pub fn available_one_time_keys(&self) -> usize {
        let prekeys = self.account.prekeys();
        match self.server_one_time_key_count {
            Some(count) => usize::try_from(count)
                .unwrap_or(usize::MAX)
                .saturating_add(prekeys.unpublished_count()),
            None => prekeys.len(),
        }
    }
}
