//! Single-use prekeys (one-time keys).
//!
//! Keys are published in batches so other devices can start a pairwise
//! session with us without a round trip. Locally a key is either unpublished
//! or published; the key server hands each published key out at most once and
//! we drop the secret as soon as a session consumes it.

use std::collections::BTreeMap;

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as Curve25519PublicKey, StaticSecret};

use crate::encoding;

/// Identifier of a one-time key, allocated from a counter that never repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId(u64);

impl KeyId {
    pub fn value(self) -> u64 {
        self.0
    }

    /// Base64 of the big-endian id, as used in `signed_curve25519:<key_id>`.
    pub fn to_base64(self) -> String {
        encoding::encode(self.0.to_be_bytes())
    }
}

struct OneTimeKey {
    secret: StaticSecret,
    public: Curve25519PublicKey,
    published: bool,
}

/// Published keys kept per key the server may hold. A published key may
/// already have been claimed by a device whose pre-key message is still in
/// flight, so it is kept for a while after the server stops advertising it.
const STORAGE_FACTOR: usize = 2;

/// Pool of one-time keys.
///
/// `capacity` is the server-advertised maximum and bounds the unpublished
/// keys. The pool itself stores up to `STORAGE_FACTOR` times as many keys.
pub struct PrekeyPool {
    keys: BTreeMap<KeyId, OneTimeKey>,
    next_id: u64,
    capacity: usize,
}

impl PrekeyPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: BTreeMap::new(),
            next_id: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn unpublished_count(&self) -> usize {
        self.keys.values().filter(|k| !k.published).count()
    }

    pub fn published_count(&self) -> usize {
        self.keys.len() - self.unpublished_count()
    }

    /// Most keys held locally, published or not.
    pub fn storage_limit(&self) -> usize {
        self.capacity.saturating_mul(STORAGE_FACTOR)
    }

    /// Generate up to `count` new keys and return their ids.
    ///
    /// At most `capacity` keys are ever unpublished. Once the pool holds
    /// `storage_limit` keys, the oldest published keys are evicted to make
    /// room; unpublished keys are never evicted.
    pub fn generate(&mut self, count: usize) -> Vec<KeyId> {
        let count = count.min(self.capacity.saturating_sub(self.unpublished_count()));
        let overflow = (self.keys.len() + count).saturating_sub(self.storage_limit());
        if overflow > 0 {
            let evict: Vec<KeyId> = self
                .keys
                .iter()
                .filter(|(_, key)| key.published)
                .map(|(id, _)| *id)
                .take(overflow)
                .collect();
            for id in &evict {
                self.keys.remove(id);
            }
            if !evict.is_empty() {
                tracing::debug!(evicted = evict.len(), "evicted oldest published one-time keys");
            }
        }

        let room = self.storage_limit().saturating_sub(self.keys.len());
        let mut generated = Vec::with_capacity(count.min(room));
        for _ in 0..count.min(room) {
            let id = KeyId(self.next_id);
            self.next_id += 1;
            let secret = StaticSecret::random_from_rng(OsRng);
            let public = Curve25519PublicKey::from(&secret);
            self.keys.insert(
                id,
                OneTimeKey {
                    secret,
                    public,
                    published: false,
                },
            );
            generated.push(id);
        }
        generated
    }

    /// Public halves of every key not yet uploaded.
    pub fn unpublished(&self) -> BTreeMap<KeyId, Curve25519PublicKey> {
        self.keys
            .iter()
            .filter(|(_, key)| !key.published)
            .map(|(id, key)| (*id, key.public))
            .collect()
    }

    /// Flip the given keys to published. Unknown ids (for instance keys that
    /// were consumed meanwhile) are ignored. Returns how many flipped.
    pub fn mark_published(&mut self, ids: &[KeyId]) -> usize {
        let mut flipped = 0;
        for id in ids {
            if let Some(key) = self.keys.get_mut(id) {
                if !key.published {
                    key.published = true;
                    flipped += 1;
                }
            }
        }
        flipped
    }

    pub fn mark_all_published(&mut self) -> usize {
        let ids: Vec<KeyId> = self.keys.keys().copied().collect();
        self.mark_published(&ids)
    }

    pub fn contains(&self, public: &Curve25519PublicKey) -> bool {
        self.keys.values().any(|key| key.public == *public)
    }

    pub(crate) fn secret_for(&self, public: &Curve25519PublicKey) -> Option<&StaticSecret> {
        self.keys
            .values()
            .find(|key| key.public == *public)
            .map(|key| &key.secret)
    }

    /// Drop a consumed key. Its id is never handed out again.
    pub(crate) fn remove(&mut self, public: &Curve25519PublicKey) -> bool {
        let before = self.keys.len();
        self.keys.retain(|_, key| key.public != *public);
        self.keys.len() != before
    }
}

impl std::fmt::Debug for PrekeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrekeyPool")
            .field("len", &self.keys.len())
            .field("unpublished", &self.unpublished_count())
            .field("capacity", &self.capacity)
            .field("storage_limit", &self.storage_limit())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_bounded_by_capacity() {
        let mut pool = PrekeyPool::new(10);
        assert_eq!(pool.generate(25).len(), 10);
        assert_eq!(pool.len(), 10);
        assert!(pool.generate(1).is_empty(), "unpublished keys are never evicted");
    }

    #[test]
    fn ids_are_never_reused() {
        let mut pool = PrekeyPool::new(4);
        let first = pool.generate(4);
        pool.mark_all_published();
        let second = pool.generate(2);

        assert_eq!(pool.len(), 6);
        assert!(second.iter().all(|id| !first.contains(id)));
        assert!(second[0] > *first.last().unwrap());
    }

    #[test]
    fn published_keys_outlive_one_refill() {
        let mut pool = PrekeyPool::new(3);
        let first = pool.generate(3);
        let publics: Vec<_> = first.iter().map(|id| pool.unpublished()[id]).collect();
        pool.mark_all_published();

        assert_eq!(pool.generate(3).len(), 3);
        assert_eq!(pool.len(), pool.storage_limit());
        assert!(publics.iter().all(|public| pool.secret_for(public).is_some()));
    }

    #[test]
    fn oldest_published_keys_are_evicted_first() {
        let mut pool = PrekeyPool::new(3);
        let first = pool.generate(3);
        pool.mark_all_published();
        let second = pool.generate(3);
        pool.mark_published(&second[..1]);

        let fresh = pool.generate(5);
        assert_eq!(fresh.len(), 1, "unpublished keys stay within capacity");
        assert_eq!(pool.len(), 6);

        let pending = pool.unpublished();
        assert!(pending.contains_key(&second[1]));
        assert!(pending.contains_key(&second[2]));
        assert!(pending.contains_key(&fresh[0]));
        assert_eq!(pool.published_count(), 3);
        assert!(!pool.keys.contains_key(&first[0]));
        assert!(pool.keys.contains_key(&first[1]));
    }

    #[test]
    fn mark_published_only_flips_listed_batch() {
        let mut pool = PrekeyPool::new(10);
        let batch = pool.generate(3);
        let later = pool.generate(2);

        assert_eq!(pool.mark_published(&batch), 3);
        assert_eq!(pool.mark_published(&batch), 0);
        assert_eq!(pool.unpublished_count(), 2);
        assert_eq!(pool.published_count(), 3);
        assert!(later.iter().all(|id| pool.unpublished().contains_key(id)));
    }

    #[test]
    fn removed_keys_are_gone() {
        let mut pool = PrekeyPool::new(2);
        let ids = pool.generate(1);
        let public = pool.unpublished()[&ids[0]];

        assert!(pool.contains(&public));
        assert!(pool.secret_for(&public).is_some());
        assert!(pool.remove(&public));
        assert!(!pool.remove(&public));
        assert!(pool.secret_for(&public).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn key_id_base64_is_big_endian() {
        assert_eq!(KeyId(1).to_base64(), "AAAAAAAAAAE");
    }
}
