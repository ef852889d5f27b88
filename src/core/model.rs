//! Equipment description model
//!
//! One document describes one BIB: its units, their ports, and the
//! Start/Test/Stop command scripts of every port. Patterns are compiled while
//! the document is deserialised, so a bad regex rejects the document instead
//! of surfacing mid-run. Unknown fields are ignored.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::transport::{Framing, SerialFlowControl, SerialParity};

/// Regex compiled at load time, kept next to its source text
#[derive(Clone)]
pub struct CompiledPattern {
    raw: String,
    regex: Regex,
}

impl CompiledPattern {
    /// Compile a pattern
    pub fn new(raw: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            raw: raw.to_string(),
            regex: Regex::new(raw)?,
        })
    }

    /// Source text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Compiled form
    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

impl fmt::Debug for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.raw)
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl TryFrom<String> for CompiledPattern {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(&raw).map_err(|e| format!("invalid pattern '{raw}': {e}"))
    }
}

impl Serialize for CompiledPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for CompiledPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// One severity level's pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelPattern {
    /// Regex tested against the trimmed response
    pub pattern: CompiledPattern,
    /// Assert the critical-fail output when this pattern classifies a response
    #[serde(default)]
    pub trigger_hardware: bool,
}

impl LevelPattern {
    /// Build a level pattern from source text
    pub fn new(pattern: &str, trigger_hardware: bool) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: CompiledPattern::new(pattern)?,
            trigger_hardware,
        })
    }
}

/// Optional WARN / FAIL / CRITICAL patterns of a command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelPatterns {
    /// Downgrades a response to WARN
    pub warn: Option<LevelPattern>,
    /// Marks a response as FAIL
    pub fail: Option<LevelPattern>,
    /// Marks a response as CRITICAL
    pub critical: Option<LevelPattern>,
}

impl LevelPatterns {
    /// Whether any level pattern is configured
    pub fn is_empty(&self) -> bool {
        self.warn.is_none() && self.fail.is_none() && self.critical.is_none()
    }
}

fn default_timeout_ms() -> u64 {
    2000
}

/// One scripted command of a phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Text sent to the port (the port's line ending is appended)
    pub command: String,
    /// Primary expected response
    #[serde(default)]
    pub expect: String,
    /// Primary expectation as a regex; takes precedence over `expect`
    #[serde(default)]
    pub expect_pattern: Option<CompiledPattern>,
    /// Response timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Keep running the phase after a FAIL of this command
    #[serde(default)]
    pub continue_on_failure: bool,
    /// Multi-level patterns
    #[serde(default, skip_serializing_if = "LevelPatterns::is_empty")]
    pub levels: LevelPatterns,
}

impl Command {
    /// Command with an exact expected response
    pub fn new(command: &str, expect: &str) -> Self {
        Self {
            command: command.to_string(),
            expect: expect.to_string(),
            expect_pattern: None,
            timeout_ms: default_timeout_ms(),
            continue_on_failure: false,
            levels: LevelPatterns::default(),
        }
    }

    /// Set the timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set continue-on-failure
    #[must_use]
    pub fn continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }

    /// Set the level patterns
    #[must_use]
    pub fn levels(mut self, levels: LevelPatterns) -> Self {
        self.levels = levels;
        self
    }

    /// Response timeout
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Port phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Bring the UUT up
    Start,
    /// Exercise the UUT
    Test,
    /// Bring the UUT down
    Stop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Test => write!(f, "Test"),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

fn default_protocol() -> String {
    "rs232".to_string()
}

fn default_speed() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_line_ending() -> String {
    "\r\n".to_string()
}

/// One communication port of a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Port number within the unit
    pub number: u32,
    /// Physical selector (COM11, /dev/ttyUSB0); `PORT<number>` when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Protocol label
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Baud rate
    #[serde(default = "default_speed")]
    pub speed: u32,
    /// Data bits
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity
    #[serde(default)]
    pub parity: SerialParity,
    /// Stop bits
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Flow control
    #[serde(default)]
    pub flow_control: SerialFlowControl,
    /// Appended to every command
    #[serde(default = "default_line_ending")]
    pub line_ending: String,
    /// Start phase script
    #[serde(default)]
    pub start: Vec<Command>,
    /// Test phase script
    #[serde(default)]
    pub test: Vec<Command>,
    /// Stop phase script
    #[serde(default)]
    pub stop: Vec<Command>,
}

impl PortConfig {
    /// Port with default framing and empty scripts
    pub fn new(number: u32) -> Self {
        Self {
            number,
            name: None,
            protocol: default_protocol(),
            speed: default_speed(),
            data_bits: default_data_bits(),
            parity: SerialParity::None,
            stop_bits: default_stop_bits(),
            flow_control: SerialFlowControl::None,
            line_ending: default_line_ending(),
            start: Vec::new(),
            test: Vec::new(),
            stop: Vec::new(),
        }
    }

    /// Selector used to resolve the physical port
    pub fn selector(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("PORT{}", self.number))
    }

    /// Framing handed to the transport
    pub fn framing(&self) -> Framing {
        Framing {
            baud_rate: self.speed,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            flow_control: self.flow_control,
        }
    }

    /// Script of a phase
    pub fn commands(&self, phase: Phase) -> &[Command] {
        match phase {
            Phase::Start => &self.start,
            Phase::Test => &self.test,
            Phase::Stop => &self.stop,
        }
    }
}

/// One unit under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Unit id, unique within the equipment
    pub id: String,
    /// Ports of the unit
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

/// Equipment-wide critical pattern, checked for every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalCondition {
    /// Label used in reports
    pub name: String,
    /// Regex tested against every response
    pub pattern: CompiledPattern,
    /// Assert the critical-fail output on match
    #[serde(default)]
    pub trigger_hardware: bool,
}

/// Largest delay, interval or variation a simulation may declare, in seconds
pub const MAX_SCHEDULE_SECONDS: f64 = u32::MAX as f64;

/// Start trigger timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartTrigger {
    /// Delay before the first Start
    pub delay_seconds: f64,
    /// Interval between Starts
    pub repeat_interval_seconds: f64,
    /// Uniform jitter applied to the interval, ±
    pub random_variation_seconds: f64,
}

impl Default for StartTrigger {
    fn default() -> Self {
        Self {
            delay_seconds: 5.0,
            repeat_interval_seconds: 30.0,
            random_variation_seconds: 0.0,
        }
    }
}

/// Stop trigger rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopTrigger {
    /// Cycles run before a Stop
    pub cycle_count: u32,
    /// Uniform jitter applied to `cycle_count`, ±
    pub variation: u32,
}

impl Default for StopTrigger {
    fn default() -> Self {
        Self {
            cycle_count: 10,
            variation: 0,
        }
    }
}

/// Simulated critical fault injection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalTrigger {
    /// Enable injection
    pub enabled: bool,
    /// Completed cycles before injection may happen
    pub min_cycles: u64,
    /// Per-cycle probability, 0.0 to 1.0
    pub probability: f64,
    /// Response text substituted for the next Test response
    pub pattern: String,
}

impl Default for CriticalTrigger {
    fn default() -> Self {
        Self {
            enabled: false,
            min_cycles: 0,
            probability: 0.0,
            pattern: "CRITICAL_FAULT".to_string(),
        }
    }
}

/// Simulation block of a description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Use the simulated trigger source for this equipment
    pub enabled: bool,
    /// Start timing
    pub start: StartTrigger,
    /// Stop rule
    pub stop: StopTrigger,
    /// Critical injection
    pub critical: CriticalTrigger,
    /// Fixed RNG seed, for reproducible runs
    pub seed: Option<u64>,
}

/// Hardware trigger wiring of a description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareTriggerConfig {
    /// Input whose rising edge emits Start
    pub start_input: Option<String>,
    /// Input whose rising edge emits Stop
    pub stop_input: Option<String>,
    /// Poll interval override
    pub poll_interval_ms: Option<u64>,
    /// Debounce override
    pub debounce_ms: Option<u64>,
}

/// One equipment description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentConfig {
    /// Identity used for hot-add deduplication
    pub id: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Units under test
    #[serde(default)]
    pub units: Vec<UnitConfig>,
    /// Simulated trigger timing
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
    /// Hardware trigger wiring
    #[serde(default)]
    pub hardware_trigger: Option<HardwareTriggerConfig>,
    /// Equipment-wide critical patterns
    #[serde(default)]
    pub critical_conditions: Vec<CriticalCondition>,
}

impl EquipmentConfig {
    /// Simulation block, when present and enabled
    pub fn active_simulation(&self) -> Option<&SimulationConfig> {
        self.simulation.as_ref().filter(|s| s.enabled)
    }

    /// Total number of ports over all units
    pub fn port_count(&self) -> usize {
        self.units.iter().map(|u| u.ports.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiled_pattern_rejects_bad_regex() {
        let err = CompiledPattern::try_from("^(FAULT".to_string()).unwrap_err();
        assert!(err.contains("^(FAULT"));
    }

    #[test]
    fn test_compiled_pattern_equality_uses_source() {
        assert_eq!(
            CompiledPattern::new("^OK$").unwrap(),
            CompiledPattern::new("^OK$").unwrap()
        );
    }

    #[test]
    fn test_port_defaults() {
        let port = PortConfig::new(3);
        assert_eq!(port.selector(), "PORT3");
        assert_eq!(port.framing(), Framing::default());
        assert!(port.commands(Phase::Test).is_empty());
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("ATZ", "OK")
            .timeout(Duration::from_secs(1))
            .continue_on_failure(true);
        assert_eq!(cmd.timeout_ms, 1000);
        assert!(cmd.continue_on_failure);
        assert!(cmd.levels.is_empty());
    }
}
