//! Equipment instance state machine
//!
//! Formal lifecycle of one equipment instance. Every transition is validated
//! and kept in a bounded history for snapshots and post-mortems.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Waiting for a Start trigger
    Idle,
    /// Control loop spawned, trigger source being set up
    Starting,
    /// Test session in progress
    Running,
    /// Cancellation requested, final Stop pass running
    Stopping,
    /// Last cycle hit an unrecoverable port error
    Error,
    /// Control loop terminated
    Removed,
}

impl InstanceStatus {
    /// Check if the control loop is gone
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }

    /// Check if a test session is in progress
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Error)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: InstanceStatus,
    /// New state
    pub to: InstanceStatus,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Instance state machine
#[derive(Debug)]
pub struct InstanceStateMachine {
    state: InstanceStatus,
    history: VecDeque<StateTransition>,
    max_history: usize,
    last_transition: Instant,
    state_durations: HashMap<InstanceStatus, Duration>,
}

impl Default for InstanceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceStateMachine {
    /// Create a new state machine in `Idle`
    pub fn new() -> Self {
        Self {
            state: InstanceStatus::Idle,
            history: VecDeque::new(),
            max_history: 100,
            last_transition: Instant::now(),
            state_durations: HashMap::new(),
        }
    }

    /// Get current state
    pub fn state(&self) -> InstanceStatus {
        self.state
    }

    /// Get state history, oldest first
    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    /// Get time in current state
    pub fn time_in_state(&self) -> Duration {
        self.last_transition.elapsed()
    }

    /// Get total time spent in a state, excluding the current stay
    pub fn total_time_in_state(&self, state: InstanceStatus) -> Duration {
        self.state_durations.get(&state).copied().unwrap_or_default()
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: InstanceStatus, reason: Option<&str>) -> Result<(), String> {
        if !Self::is_valid_transition(self.state, new_state) {
            return Err(format!("Invalid transition from {} to {}", self.state, new_state));
        }
        if new_state == self.state {
            return Ok(());
        }

        *self.state_durations.entry(self.state).or_default() += self.last_transition.elapsed();

        self.history.push_back(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > self.max_history {
            self.history.pop_front();
        }

        self.state = new_state;
        self.last_transition = Instant::now();
        Ok(())
    }

    fn is_valid_transition(from: InstanceStatus, to: InstanceStatus) -> bool {
        use InstanceStatus::*;

        match (from, to) {
            (Removed, _) => false,
            (a, b) if a == b => true,

            // Cancellation is accepted from every live state
            (_, Stopping) => true,
            (Stopping, Removed) => true,

            (Idle, Starting) => true,
            (Idle, Running) => true,

            (Starting, Idle) => true,
            (Starting, Running) => true,

            (Running, Idle) => true,
            (Running, Error) => true,

            (Error, Running) => true,
            (Error, Idle) => true,

            _ => false,
        }
    }
}
