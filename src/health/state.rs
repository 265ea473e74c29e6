//! Pipeline monitoring state machine.
//!
//! # State Transitions
//! ```text
//! INITIALIZING → RUNNING: connection established / healthy evaluator cycle
//! INITIALIZING | RUNNING → ERROR: connect failure, lost connection, loop panic
//! ERROR → RUNNING: reconnect succeeds (unless the failure was terminal)
//! any → STOPPED: explicit stop (sticky)
//! ```

use std::fmt;

use serde::Serialize;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitoringState {
    Initializing = 0,
    Running = 1,
    Error = 2,
    Stopped = 3,
}

impl From<u8> for MonitoringState {
    fn from(val: u8) -> Self {
        match val {
            1 => MonitoringState::Running,
            2 => MonitoringState::Error,
            3 => MonitoringState::Stopped,
            _ => MonitoringState::Initializing,
        }
    }
}

impl MonitoringState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for MonitoringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
