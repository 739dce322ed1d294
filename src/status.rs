//! Coarse device lifecycle.
//!
//! [`StatusMachine::apply`] is the only way the current [`ConnectionState`]
//! changes. It returns the [`Transition`] that happened (if any) so the caller
//! can emit exactly one log line per real change.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Booting,
    LinkUp,
    SessionUp,
    Updating,
    Faulted,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Booting => "BOOTING",
            ConnectionState::LinkUp => "LINK_UP",
            ConnectionState::SessionUp => "SESSION_UP",
            ConnectionState::Updating => "UPDATING",
            ConnectionState::Faulted => "FAULTED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    LinkEstablished,
    SessionEstablished,
    UpdateAccepted,
    UpdateFinished,
    SessionLost,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status changed: {} -> {}", self.from, self.to)
    }
}

#[derive(Debug)]
pub struct StatusMachine {
    current: ConnectionState,
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMachine {
    pub fn new() -> Self {
        Self {
            current: ConnectionState::Booting,
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.current
    }

    /// Applies `event`. Returns `None` when the event has no row for the
    /// current state or when it would re-enter the current state.
    pub fn apply(&mut self, event: StatusEvent) -> Option<Transition> {
        use ConnectionState::*;

        let next = match (self.current, event) {
            (_, StatusEvent::Fault) => Faulted,
            (Booting, StatusEvent::LinkEstablished) => LinkUp,
            (LinkUp, StatusEvent::SessionEstablished) => SessionUp,
            (SessionUp, StatusEvent::UpdateAccepted) => Updating,
            (Updating, StatusEvent::UpdateFinished) => SessionUp,
            (SessionUp, StatusEvent::SessionLost) => LinkUp,
            (state, event) => {
                tracing::debug!(state = %state, ?event, "No transition for event");
                return None;
            }
        };

        if next == self.current {
            return None;
        }

        let transition = Transition {
            from: self.current,
            to: next,
        };
        self.current = next;
        Some(transition)
    }
}
