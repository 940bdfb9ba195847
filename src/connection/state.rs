//! Connection state machine

use crate::{Error, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, startup not sent
    Initial,

    /// Startup sent, awaiting authentication request
    AwaitingAuth,

    /// Authentication in progress
    Authenticating,

    /// Idle (ready for query)
    Idle,

    /// Query sent, reading results
    Busy,

    /// Closed
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Initial, AwaitingAuth)
                | (AwaitingAuth, Authenticating)
                | (Authenticating, Idle)
                | (Idle, Busy)
                | (Busy, Idle)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Initial => "initial",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticating => "authenticating",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Closed => "closed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_transitions() {
        let mut state = ConnectionState::Initial;
        assert!(state.transition(ConnectionState::AwaitingAuth).is_ok());
        assert!(state.transition(ConnectionState::Authenticating).is_ok());
        assert!(state.transition(ConnectionState::Idle).is_ok());
        assert!(state.transition(ConnectionState::Busy).is_ok());
        assert!(state.transition(ConnectionState::Idle).is_ok());
    }

    #[test]
    fn test_cannot_query_before_auth() {
        let mut state = ConnectionState::AwaitingAuth;
        assert!(state.transition(ConnectionState::Busy).is_err());
        assert_eq!(state, ConnectionState::AwaitingAuth);
    }

    #[test]
    fn test_close_from_any_state() {
        let mut state = ConnectionState::Busy;
        assert!(state.transition(ConnectionState::Closed).is_ok());
        assert!(state.transition(ConnectionState::Idle).is_err());
    }
}
