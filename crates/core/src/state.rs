//! Server lifecycle state
//!
//! `Unknown → Starting → Running → Stopping → {Stopped, Error}`, with
//! `Starting → Error` when the initial load fails and `Stopped → Starting`
//! for a restart. Transitions are compare-and-swap on an atomic so that
//! concurrent start/stop calls cannot both win.

use crate::error::{KvError, KvResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state visible to health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ServerState {
    /// Constructed, never started
    Unknown = 0,
    /// Loading persisted state
    Starting = 1,
    /// Serving requests
    Running = 2,
    /// Draining and flushing
    Stopping = 3,
    /// Cleanly stopped
    Stopped = 4,
    /// Failed to start or to flush on stop
    Error = 5,
}

impl ServerState {
    /// Name used by `status()`
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Unknown => "Unknown",
            ServerState::Starting => "Starting",
            ServerState::Running => "Running",
            ServerState::Stopping => "Stopping",
            ServerState::Stopped => "Stopped",
            ServerState::Error => "Error",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            4 => ServerState::Stopped,
            5 => ServerState::Error,
            _ => ServerState::Unknown,
        }
    }

    /// Whether `self → to` is a legal transition
    pub fn can_transition_to(&self, to: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, to),
            (Unknown, Starting)
                | (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Error)
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder for [`ServerState`]
#[derive(Debug)]
pub struct ServerStateCell {
    raw: AtomicU8,
}

impl ServerStateCell {
    /// Start in `Unknown`
    pub fn new() -> Self {
        Self {
            raw: AtomicU8::new(ServerState::Unknown as u8),
        }
    }

    /// Current state
    #[inline]
    pub fn get(&self) -> ServerState {
        ServerState::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// Move from `from` to `to` if the cell still holds `from`
    pub fn transition(&self, from: ServerState, to: ServerState) -> KvResult<()> {
        if !from.can_transition_to(to) {
            return Err(KvError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.raw
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| KvError::InvalidStateTransition {
                from: ServerState::from_u8(actual).to_string(),
                to: to.to_string(),
            })
    }

    /// Move to `to` from whichever of `from` the cell currently holds
    pub fn transition_from_any(&self, from: &[ServerState], to: ServerState) -> KvResult<ServerState> {
        let current = self.get();
        if !from.contains(&current) {
            return Err(KvError::InvalidStateTransition {
                from: current.to_string(),
                to: to.to_string(),
            });
        }
        self.transition(current, to).map(|_| current)
    }
}

impl Default for ServerStateCell {
    fn default() -> Self {
        Self::new()
    }
}
