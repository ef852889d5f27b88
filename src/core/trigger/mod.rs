//! Trigger sources
//!
//! A trigger source tells one equipment instance when to run a cycle and
//! when its test session is over. Two variants share one contract:
//! - Hardware: rising edges of bench input lines
//! - Simulated: timer schedule with random jitter and critical injection

pub mod hardware;
pub mod simulated;

pub use hardware::HardwareTrigger;
pub use simulated::SimulatedTrigger;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::hardware::HardwareSignalProvider;
use super::model::{EquipmentConfig, HardwareTriggerConfig, SimulationConfig};

/// Event emitted by a trigger source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    /// Run one cycle
    Start,
    /// End the test session
    Stop,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

/// Service-wide trigger defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSettings {
    /// Input line whose rising edge starts a cycle
    pub start_input: String,
    /// Input line whose rising edge ends the session
    pub stop_input: String,
    /// Hardware poll interval
    pub poll_interval: Duration,
    /// Minimum stable time of an input level
    pub debounce: Duration,
    /// Simulated tick resolution
    pub tick: Duration,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            start_input: "START".to_string(),
            stop_input: "STOP".to_string(),
            poll_interval: Duration::from_millis(100),
            debounce: Duration::from_millis(50),
            tick: Duration::from_secs(1),
        }
    }
}

/// Trigger source of one instance
pub enum TriggerSource {
    /// Bench input lines
    Hardware(HardwareTrigger),
    /// Timer schedule
    Simulated(SimulatedTrigger),
}

impl TriggerSource {
    /// Build the source a description asks for
    ///
    /// An enabled simulation block selects the simulated variant; everything
    /// else is wired to the hardware lines.
    pub fn for_equipment(
        config: &EquipmentConfig,
        settings: &TriggerSettings,
        signals: Arc<dyn HardwareSignalProvider>,
    ) -> Self {
        match config.active_simulation() {
            Some(simulation) => Self::Simulated(SimulatedTrigger::new(simulation.clone(), settings.tick)),
            None => {
                let wiring = config.hardware_trigger.clone().unwrap_or_default();
                Self::Hardware(HardwareTrigger::from_config(&wiring, settings, signals))
            }
        }
    }

    /// Wait for the next event; `None` once `cancel` fires
    pub async fn next_event(&mut self, cancel: &CancellationToken) -> Option<TriggerEvent> {
        match self {
            Self::Hardware(trigger) => trigger.next_event(cancel).await,
            Self::Simulated(trigger) => trigger.next_event(cancel).await,
        }
    }

    /// Response override armed for the cycle just started
    pub fn take_response_override(&mut self) -> Option<String> {
        match self {
            Self::Hardware(_) => None,
            Self::Simulated(trigger) => trigger.take_response_override(),
        }
    }

    /// Short name for logs and snapshots
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hardware(_) => "hardware",
            Self::Simulated(_) => "simulated",
        }
    }
}

/// The parts of a description a trigger source is built from
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerBasis {
    simulation: Option<SimulationConfig>,
    hardware: Option<HardwareTriggerConfig>,
}

impl TriggerBasis {
    /// Capture the trigger-relevant parts of a description
    pub fn of(config: &EquipmentConfig) -> Self {
        Self {
            simulation: config.active_simulation().cloned(),
            hardware: config.hardware_trigger.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hardware::SignalBoard;

    fn equipment(simulated: bool) -> EquipmentConfig {
        EquipmentConfig {
            id: "bib".to_string(),
            description: None,
            units: Vec::new(),
            simulation: Some(SimulationConfig {
                enabled: simulated,
                ..SimulationConfig::default()
            }),
            hardware_trigger: None,
            critical_conditions: Vec::new(),
        }
    }

    #[test]
    fn test_variant_selection() {
        let signals: Arc<dyn HardwareSignalProvider> = Arc::new(SignalBoard::new());
        let settings = TriggerSettings::default();

        let sim = TriggerSource::for_equipment(&equipment(true), &settings, signals.clone());
        assert_eq!(sim.kind(), "simulated");

        let hw = TriggerSource::for_equipment(&equipment(false), &settings, signals);
        assert_eq!(hw.kind(), "hardware");
    }

    #[test]
    fn test_basis_ignores_disabled_simulation() {
        let mut a = equipment(false);
        let b = equipment(false);
        a.simulation.as_mut().unwrap().stop.cycle_count = 99;
        assert_eq!(TriggerBasis::of(&a), TriggerBasis::of(&b));

        let mut c = equipment(true);
        assert_ne!(TriggerBasis::of(&c), TriggerBasis::of(&b));
        c.description = Some("changed".to_string());
        assert_eq!(TriggerBasis::of(&c), TriggerBasis::of(&equipment(true)));
    }
}
