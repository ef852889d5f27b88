//! Hardware signal collaborator
//!
//! The bench wiring (start/stop inputs, critical-fail output) sits behind
//! [`HardwareSignalProvider`]. [`SignalBoard`] is an in-memory provider used
//! by simulated benches and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::error::HardwareSignalError;

/// Access to bench digital I/O
#[async_trait]
pub trait HardwareSignalProvider: Send + Sync {
    /// Read the current level of an input line
    async fn read_input(&self, name: &str) -> Result<bool, HardwareSignalError>;

    /// Drive an output line
    ///
    /// A `true` level auto-clears after `hold` unless re-asserted.
    /// `Duration::ZERO` latches until explicitly cleared.
    async fn set_output(
        &self,
        name: &str,
        value: bool,
        hold: Duration,
    ) -> Result<(), HardwareSignalError>;
}

#[derive(Debug, Clone, Copy, Default)]
struct Output {
    value: bool,
    expires_at: Option<Instant>,
    assertions: u64,
}

impl Output {
    fn level(&self, now: Instant) -> bool {
        self.value && self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

#[derive(Debug, Default)]
struct BoardState {
    inputs: HashMap<String, bool>,
    outputs: HashMap<String, Output>,
    faulty: HashMap<String, String>,
}

/// In-memory signal board
///
/// Inputs are driven from code (`set_input`), outputs are observable with
/// `output`. Expiry is evaluated lazily against tokio's clock, so paused
/// test time behaves like wall time.
#[derive(Debug, Clone, Default)]
pub struct SignalBoard {
    state: Arc<RwLock<BoardState>>,
}

impl SignalBoard {
    /// Create an empty board
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an input line
    pub fn set_input(&self, name: &str, value: bool) {
        self.state.write().inputs.insert(name.to_string(), value);
    }

    /// Current level of an output line
    pub fn output(&self, name: &str) -> bool {
        self.state
            .read()
            .outputs
            .get(name)
            .is_some_and(|o| o.level(Instant::now()))
    }

    /// How many times an output was asserted
    pub fn assertions(&self, name: &str) -> u64 {
        self.state.read().outputs.get(name).map_or(0, |o| o.assertions)
    }

    /// Make every access to `name` fail with an I/O error
    pub fn inject_fault(&self, name: &str, reason: &str) {
        self.state
            .write()
            .faulty
            .insert(name.to_string(), reason.to_string());
    }

    /// Remove an injected fault
    pub fn clear_fault(&self, name: &str) {
        self.state.write().faulty.remove(name);
    }

    fn check_fault(state: &BoardState, name: &str) -> Result<(), HardwareSignalError> {
        match state.faulty.get(name) {
            Some(reason) => Err(HardwareSignalError::Io {
                name: name.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HardwareSignalProvider for SignalBoard {
    async fn read_input(&self, name: &str) -> Result<bool, HardwareSignalError> {
        let state = self.state.read();
        Self::check_fault(&state, name)?;
        Ok(state.inputs.get(name).copied().unwrap_or(false))
    }

    async fn set_output(
        &self,
        name: &str,
        value: bool,
        hold: Duration,
    ) -> Result<(), HardwareSignalError> {
        let mut state = self.state.write();
        Self::check_fault(&state, name)?;

        let output = state.outputs.entry(name.to_string()).or_default();
        output.value = value;
        output.expires_at = (value && !hold.is_zero()).then(|| Instant::now() + hold);
        if value {
            output.assertions += 1;
        }
        Ok(())
    }
}
