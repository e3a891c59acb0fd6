use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::group::session::OutboundGroupSession;

/// Holds at most one live outbound group session per room.
///
/// Replaced sessions are dropped, which wipes their ratchet and signing key.
/// Callers that still need an old session id must read it before rotating.
#[derive(Debug, Default)]
pub struct GroupSessionManager {
    sessions: HashMap<String, OutboundGroupSession>,
}

impl GroupSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh session for `room_id`, replacing any existing one.
    pub fn create_outbound_session(&mut self, room_id: &str) -> &mut OutboundGroupSession {
        let session = OutboundGroupSession::new(room_id);
        tracing::info!(
            room_id,
            session_id = session.session_id(),
            "created outbound group session"
        );
        match self.sessions.entry(room_id.to_owned()) {
            Entry::Occupied(mut entry) => {
                let old = entry.insert(session);
                tracing::debug!(
                    room_id,
                    replaced_session_id = old.session_id(),
                    messages = old.message_count(),
                    "discarded previous outbound group session"
                );
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(session),
        }
    }

    pub fn get_or_create(&mut self, room_id: &str) -> &mut OutboundGroupSession {
        match self.sessions.entry(room_id.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let session = OutboundGroupSession::new(room_id);
                tracing::info!(
                    room_id,
                    session_id = session.session_id(),
                    "created outbound group session"
                );
                entry.insert(session)
            }
        }
    }

    pub fn get(&self, room_id: &str) -> Option<&OutboundGroupSession> {
        self.sessions.get(room_id)
    }

    /// Drop the room's session, returning its id.
    pub fn discard(&mut self, room_id: &str) -> Option<String> {
        self.sessions
            .remove(room_id)
            .map(|session| session.session_id().to_owned())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
