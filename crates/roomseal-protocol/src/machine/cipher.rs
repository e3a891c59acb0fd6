use roomseal_crypto::encoding;

use crate::envelope::CiphertextEnvelope;
use crate::error::E2eeError;
use crate::machine::E2eeMachine;

impl E2eeMachine {
    /// Encrypt `plaintext` for `room_id` with the room's outbound group
    /// session, creating or rotating the session as needed.
    ///
    /// Every call advances the ratchet exactly once, including calls whose
    /// envelope is never sent. A retried send must call this again.
    pub fn encrypt(&self, room_id: &str, plaintext: &[u8]) -> Result<CiphertextEnvelope, E2eeError> {
        if room_id.is_empty() {
            return Err(E2eeError::InvalidArgument("room id must not be empty".into()));
        }
        let policy = self.config.rotation_policy();

        let envelope = self.with_store(|store| {
            if store
                .groups
                .get(room_id)
                .is_some_and(|session| session.expired(&policy))
            {
                let session = store.groups.create_outbound_session(room_id);
                tracing::info!(
                    room_id,
                    session_id = session.session_id(),
                    "rotated expired outbound group session"
                );
            }

            let sender_key = store.account.identity_keys().curve25519_base64();
            let session = store.groups.get_or_create(room_id);
            let message = session.encrypt(plaintext)?;
            tracing::debug!(
                room_id,
                session_id = session.session_id(),
                message_index = message.message_index(),
                "encrypted room message"
            );
            Ok(CiphertextEnvelope::new(
                sender_key,
                &message,
                session.session_id(),
                &self.device_id,
            ))
        })?;

        self.request_replenish();
        Ok(envelope)
    }

    /// Decrypt a room message.
    ///
    /// There is no source of inbound group sessions, so a well-formed
    /// envelope always yields [`E2eeError::DecryptionUnsupported`]. Envelopes
    /// that do not parse are reported as [`E2eeError::CryptoOperationFailed`].
    pub fn decrypt(&self, envelope: &CiphertextEnvelope) -> Result<Vec<u8>, E2eeError> {
        if !self.is_initialized() {
            return Err(E2eeError::CryptoNotInitialized);
        }

        let message = envelope.group_message()?;
        encoding::ed25519_from_base64(envelope.session_id())?;
        encoding::curve25519_from_base64(envelope.sender_key())?;

        tracing::debug!(
            session_id = envelope.session_id(),
            sender_key = envelope.sender_key(),
            message_index = message.message_index(),
            "no inbound group session for room message"
        );
        Err(E2eeError::DecryptionUnsupported {
            session_id: envelope.session_id().to_owned(),
        })
    }
}
