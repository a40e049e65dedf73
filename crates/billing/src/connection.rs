//! Connection lifecycle as a pure aggregate.
//!
//! The controller owns one [`Connection`], feeds it commands as the transport
//! reports progress, and applies the resulting events. Every connection
//! attempt gets a fresh generation; callbacks tagged with an older generation
//! are stale.

use serde::{Deserialize, Serialize};

use billingflow_core::{Aggregate, AggregateRoot, DomainError, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    /// Only a connected controller accepts inventory, purchase and restore requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether callbacks from the current generation are still meaningful.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCommand {
    Initialize { network_available: bool },
    MarkConnected { generation: u64 },
    MarkFailed { generation: u64, reason: String },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectStarted { generation: u64 },
    Connected { generation: u64 },
    ConnectFailed { reason: String },
    Disconnected,
}

/// Aggregate root: Connection (one per controller session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    id: SessionId,
    state: ConnectionState,
    generation: u64,
    version: u64,
}

impl Connection {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: ConnectionState::Disconnected,
            generation: 0,
            version: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a callback tagged with `generation` belongs to the live connection.
    pub fn is_current(&self, generation: u64) -> bool {
        self.state.is_live() && generation == self.generation
    }
}

impl AggregateRoot for Connection {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Connection {
    type Command = ConnectionCommand;
    type Event = ConnectionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ConnectionEvent::ConnectStarted { generation } => {
                self.generation = *generation;
                self.state = ConnectionState::Connecting;
            }
            ConnectionEvent::Connected { .. } => {
                self.state = ConnectionState::Connected;
            }
            ConnectionEvent::ConnectFailed { .. } => {
                self.state = ConnectionState::Failed;
            }
            ConnectionEvent::Disconnected => {
                self.state = ConnectionState::Disconnected;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ConnectionCommand::Initialize { network_available } => {
                self.handle_initialize(*network_available)
            }
            ConnectionCommand::MarkConnected { generation } => {
                self.ensure_attempt(*generation)?;
                if self.state != ConnectionState::Connecting {
                    return Err(DomainError::conflict("connection is not connecting"));
                }
                Ok(vec![ConnectionEvent::Connected {
                    generation: *generation,
                }])
            }
            ConnectionCommand::MarkFailed { generation, reason } => {
                self.ensure_attempt(*generation)?;
                if !self.state.is_live() {
                    return Err(DomainError::conflict("connection is not live"));
                }
                Ok(vec![ConnectionEvent::ConnectFailed {
                    reason: reason.clone(),
                }])
            }
            ConnectionCommand::Shutdown => {
                if self.state == ConnectionState::Disconnected {
                    return Ok(vec![]);
                }
                Ok(vec![ConnectionEvent::Disconnected])
            }
        }
    }
}

impl Connection {
    fn handle_initialize(
        &self,
        network_available: bool,
    ) -> Result<Vec<ConnectionEvent>, DomainError> {
        if self.state.is_live() {
            return Ok(vec![]);
        }

        if !network_available {
            return Ok(vec![ConnectionEvent::ConnectFailed {
                reason: "no network connectivity".to_string(),
            }]);
        }

        Ok(vec![ConnectionEvent::ConnectStarted {
            generation: self.generation + 1,
        }])
    }

    fn ensure_attempt(&self, generation: u64) -> Result<(), DomainError> {
        if generation != self.generation {
            return Err(DomainError::conflict(format!(
                "stale connection generation {generation} (current {})",
                self.generation
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billingflow_events::execute;

    fn connection() -> Connection {
        Connection::new(SessionId::new())
    }

    fn initialize(online: bool) -> ConnectionCommand {
        ConnectionCommand::Initialize {
            network_available: online,
        }
    }

    #[test]
    fn offline_initialize_fails_without_starting_an_attempt() {
        let mut conn = connection();
        let events = execute(&mut conn, &initialize(false)).unwrap();

        assert!(matches!(
            events.as_slice(),
            [ConnectionEvent::ConnectFailed { reason }] if reason == "no network connectivity"
        ));
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(conn.generation(), 0);
    }

    #[test]
    fn connect_then_shutdown_walks_the_lifecycle() {
        let mut conn = connection();

        execute(&mut conn, &initialize(true)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.generation(), 1);

        execute(&mut conn, &ConnectionCommand::MarkConnected { generation: 1 }).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.is_current(1));

        execute(&mut conn, &ConnectionCommand::Shutdown).unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_current(1));
        assert_eq!(conn.version(), 3);
    }

    #[test]
    fn initialize_is_a_no_op_while_live() {
        let mut conn = connection();
        execute(&mut conn, &initialize(true)).unwrap();

        let events = execute(&mut conn, &initialize(true)).unwrap();
        assert!(events.is_empty());
        assert_eq!(conn.generation(), 1);
    }

    #[test]
    fn retry_after_failure_opens_a_new_generation() {
        let mut conn = connection();
        execute(&mut conn, &initialize(true)).unwrap();
        execute(
            &mut conn,
            &ConnectionCommand::MarkFailed {
                generation: 1,
                reason: "billing unavailable".into(),
            },
        )
        .unwrap();
        assert_eq!(conn.state(), ConnectionState::Failed);

        execute(&mut conn, &initialize(true)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.generation(), 2);
    }

    #[test]
    fn stale_generation_is_rejected() {
        let mut conn = connection();
        execute(&mut conn, &initialize(true)).unwrap();
        execute(&mut conn, &ConnectionCommand::Shutdown).unwrap();
        execute(&mut conn, &initialize(true)).unwrap();

        let err = conn
            .handle(&ConnectionCommand::MarkConnected { generation: 1 })
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut conn = connection();
        assert!(execute(&mut conn, &ConnectionCommand::Shutdown).unwrap().is_empty());
        assert_eq!(conn.version(), 0);
    }

    #[test]
    fn connected_state_alone_accepts_requests() {
        assert!(ConnectionState::Connected.accepts_requests());
        for s in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Failed,
        ] {
            assert!(!s.accepts_requests());
        }
    }
}
