use serde::{Deserialize, Serialize};
use uuid::Uuid;

use billingflow_core::SessionId;

/// Envelope for an event, containing stream metadata.
///
/// Notes:
/// - `session_id` identifies the producing controller instance.
/// - `sequence_number` is monotonically increasing per session, starting at 1.
/// - `payload` is the domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    session_id: SessionId,

    /// Monotonically increasing position in the session stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(event_id: Uuid, session_id: SessionId, sequence_number: u64, payload: E) -> Self {
        Self {
            event_id,
            session_id,
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

/// Stamps payloads into envelopes with a gap-free sequence.
#[derive(Debug)]
pub struct EnvelopeSequencer {
    session_id: SessionId,
    last_sequence_number: u64,
}

impl EnvelopeSequencer {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            last_sequence_number: 0,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }

    pub fn seal<E>(&mut self, payload: E) -> EventEnvelope<E> {
        self.last_sequence_number += 1;
        EventEnvelope::new(
            Uuid::now_v7(),
            self.session_id,
            self.last_sequence_number,
            payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequencer_numbers_envelopes_from_one() {
        let session_id = SessionId::new();
        let mut seq = EnvelopeSequencer::new(session_id);

        let a = seq.seal("a");
        let b = seq.seal("b");

        assert_eq!(a.sequence_number(), 1);
        assert_eq!(b.sequence_number(), 2);
        assert_eq!(b.session_id(), session_id);
        assert_ne!(a.event_id(), b.event_id());
        assert_eq!(seq.last_sequence_number(), 2);
    }
}
