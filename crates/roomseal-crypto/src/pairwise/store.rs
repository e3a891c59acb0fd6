use std::collections::HashMap;

use x25519_dalek::PublicKey as Curve25519PublicKey;

use crate::encoding;
use crate::pairwise::session::PairwiseSession;

/// Pairwise sessions keyed by the remote device's curve25519 identity key.
///
/// Several sessions may exist per remote key. New sessions are appended and
/// older ones stay available for messages still in flight.
#[derive(Debug, Default)]
pub struct PairwiseSessionStore {
    sessions: HashMap<String, Vec<PairwiseSession>>,
}

impl PairwiseSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a session, never replacing earlier ones.
    pub fn add(&mut self, session: PairwiseSession) {
        let key = encoding::encode(session.remote_identity_key().as_bytes());
        tracing::debug!(
            remote_key = %key,
            session_id = session.session_id(),
            "stored pairwise session"
        );
        self.sessions.entry(key).or_default().push(session);
    }

    pub fn sessions_for(&self, remote_identity_key: &Curve25519PublicKey) -> &[PairwiseSession] {
        self.sessions
            .get(&encoding::encode(remote_identity_key.as_bytes()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn sessions_for_mut(
        &mut self,
        remote_identity_key: &Curve25519PublicKey,
    ) -> &mut [PairwiseSession] {
        self.sessions
            .get_mut(&encoding::encode(remote_identity_key.as_bytes()))
            .map(Vec::as_mut_slice)
            .unwrap_or_default()
    }

    pub fn session_ids(&self, remote_identity_key: &Curve25519PublicKey) -> Vec<String> {
        self.sessions_for(remote_identity_key)
            .iter()
            .map(|s| s.session_id().to_owned())
            .collect()
    }

    pub fn get_mut(
        &mut self,
        remote_identity_key: &Curve25519PublicKey,
        session_id: &str,
    ) -> Option<&mut PairwiseSession> {
        self.sessions
            .get_mut(&encoding::encode(remote_identity_key.as_bytes()))?
            .iter_mut()
            .find(|s| s.session_id() == session_id)
    }

    /// The most recently added session for a remote key.
    pub fn latest_mut(
        &mut self,
        remote_identity_key: &Curve25519PublicKey,
    ) -> Option<&mut PairwiseSession> {
        self.sessions
            .get_mut(&encoding::encode(remote_identity_key.as_bytes()))?
            .last_mut()
    }

    /// Total number of sessions across every remote key.
    pub fn len(&self) -> usize {
        self.sessions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;

    fn session_with(remote: &mut Account, local: &Account) -> PairwiseSession {
        let ids = remote.generate_one_time_keys(1);
        let otk = remote.one_time_keys()[&ids[0]];
        local
            .create_outbound_session(remote.identity_keys().curve25519, otk)
            .unwrap()
    }

    #[test]
    fn sessions_are_appended_per_remote_key() {
        let local = Account::new(10);
        let mut bob = Account::new(10);
        let mut carol = Account::new(10);
        let mut store = PairwiseSessionStore::new();

        let first = session_with(&mut bob, &local);
        let second = session_with(&mut bob, &local);
        let (first_id, second_id) = (first.session_id().to_owned(), second.session_id().to_owned());
        store.add(first);
        store.add(second);
        store.add(session_with(&mut carol, &local));

        let bob_key = bob.identity_keys().curve25519;
        assert_eq!(store.session_ids(&bob_key), [first_id.clone(), second_id.clone()]);
        assert_eq!(store.len(), 3);
        assert_eq!(store.latest_mut(&bob_key).unwrap().session_id(), second_id);
        assert!(store.get_mut(&bob_key, &first_id).is_some());
    }

    #[test]
    fn unknown_remote_has_no_sessions() {
        let mut store = PairwiseSessionStore::new();
        let stranger = Account::new(1).identity_keys().curve25519;
        assert!(store.sessions_for(&stranger).is_empty());
        assert!(store.sessions_for_mut(&stranger).is_empty());
        assert!(store.latest_mut(&stranger).is_none());
        assert!(store.is_empty());
    }
}
