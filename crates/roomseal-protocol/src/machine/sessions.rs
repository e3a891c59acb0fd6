use roomseal_crypto::{encoding, Curve25519PublicKey, PairwiseMessage};

use crate::error::E2eeError;
use crate::machine::E2eeMachine;

fn require_room(room_id: &str) -> Result<(), E2eeError> {
    if room_id.is_empty() {
        return Err(E2eeError::InvalidArgument("room id must not be empty".into()));
    }
    Ok(())
}

fn parse_curve25519(key: &str) -> Result<Curve25519PublicKey, E2eeError> {
    Ok(encoding::curve25519_from_base64(key)?)
}

impl E2eeMachine {
    /// Start a new outbound group session for `room_id`, discarding the
    /// current one. Returns the new session id.
    pub fn create_outbound_group_session(&self, room_id: &str) -> Result<String, E2eeError> {
        require_room(room_id)?;
        self.with_store(|store| {
            Ok(store
                .groups
                .create_outbound_session(room_id)
                .session_id()
                .to_owned())
        })
    }

    pub fn get_or_create_group_session(&self, room_id: &str) -> Result<String, E2eeError> {
        require_room(room_id)?;
        self.with_store(|store| Ok(store.groups.get_or_create(room_id).session_id().to_owned()))
    }

    /// Id of the room's live outbound session, if there is one.
    pub fn outbound_group_session_id(&self, room_id: &str) -> Result<Option<String>, E2eeError> {
        self.with_store(|store| {
            Ok(store
                .groups
                .get(room_id)
                .map(|session| session.session_id().to_owned()))
        })
    }

    /// Drop the room's outbound session so the next encrypt starts a new one.
    pub fn discard_group_session(&self, room_id: &str) -> Result<Option<String>, E2eeError> {
        self.with_store(|store| {
            let discarded = store.groups.discard(room_id);
            if let Some(session_id) = &discarded {
                tracing::info!(room_id, %session_id, "discarded outbound group session");
            }
            Ok(discarded)
        })
    }

    /// Establish a pairwise session with a remote device from its curve25519
    /// identity key and a one-time key claimed from the key server.
    pub fn create_outbound_pairwise_session(
        &self,
        remote_identity_key: &str,
        remote_one_time_key: &str,
    ) -> Result<String, E2eeError> {
        let identity = parse_curve25519(remote_identity_key)?;
        let one_time = parse_curve25519(remote_one_time_key)?;
        self.with_store(|store| {
            let session = store.account.create_outbound_session(identity, one_time)?;
            let session_id = session.session_id().to_owned();
            store.pairwise.add(session);
            Ok(session_id)
        })
    }

    pub fn pairwise_session_ids(&self, remote_identity_key: &str) -> Result<Vec<String>, E2eeError> {
        let identity = parse_curve25519(remote_identity_key)?;
        self.with_store(|store| Ok(store.pairwise.session_ids(&identity)))
    }

    /// Encrypt with the newest session for the remote device.
    pub fn encrypt_pairwise(
        &self,
        remote_identity_key: &str,
        plaintext: &[u8],
    ) -> Result<PairwiseMessage, E2eeError> {
        let identity = parse_curve25519(remote_identity_key)?;
        self.with_store(|store| {
            let session = store.pairwise.latest_mut(&identity).ok_or_else(|| {
                E2eeError::SessionUnavailable(format!(
                    "no pairwise session with {remote_identity_key}"
                ))
            })?;
            Ok(session.encrypt(plaintext)?)
        })
    }

    /// Decrypt a message from a remote device.
    ///
    /// A pre-key message for an unknown session creates the inbound session,
    /// consuming one of our one-time keys. Normal messages are tried against
    /// every session with that device, newest first.
    pub fn decrypt_pairwise(
        &self,
        remote_identity_key: &str,
        message: &PairwiseMessage,
    ) -> Result<Vec<u8>, E2eeError> {
        let identity = parse_curve25519(remote_identity_key)?;
        let result = self.with_store(|store| match message {
            PairwiseMessage::PreKey(prekey) => {
                let session_id = prekey.session_id();
                if let Some(session) = store.pairwise.get_mut(&identity, &session_id) {
                    return Ok((session.decrypt(message)?, false));
                }
                let (session, plaintext) = store.account.create_inbound_session(identity, prekey)?;
                tracing::info!(
                    remote_key = remote_identity_key,
                    session_id = session.session_id(),
                    "created inbound pairwise session"
                );
                store.pairwise.add(session);
                Ok((plaintext, true))
            }
            PairwiseMessage::Normal(_) => {
                let mut last_error = None;
                for session in store.pairwise.sessions_for_mut(&identity).iter_mut().rev() {
                    match session.decrypt(message) {
                        Ok(plaintext) => return Ok((plaintext, false)),
                        Err(e) => last_error = Some(e),
                    }
                }
                Err(match last_error {
                    Some(e) => e.into(),
                    None => E2eeError::SessionUnavailable(format!(
                        "no pairwise session with {remote_identity_key}"
                    )),
                })
            }
        });

        let (plaintext, consumed_one_time_key) = result?;
        if consumed_one_time_key {
            self.request_replenish();
        }
        Ok(plaintext)
    }
}
