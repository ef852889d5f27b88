//! Equipment description loading and semantic validation

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigurationError;
use super::model::{EquipmentConfig, Phase, PortConfig, SimulationConfig, MAX_SCHEDULE_SECONDS};

/// Document formats accepted in the watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// `.toml`
    Toml,
    /// `.json`
    Json,
    /// `.yaml` / `.yml`
    Yaml,
}

impl DocumentFormat {
    /// Format implied by a file extension, if it is one we load
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(self, text: &str) -> Result<T, String> {
        match self {
            Self::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        }
    }
}

/// Reads only the id, so a broken document can still be named in errors
#[derive(Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: Option<String>,
}

/// Parse and validate one description
pub fn parse_equipment(text: &str, format: DocumentFormat) -> Result<EquipmentConfig, ConfigurationError> {
    let config: EquipmentConfig = format.decode(text).map_err(|reason| {
        let err = ConfigurationError::new(reason);
        match format.decode::<IdOnly>(text).ok().and_then(|p| p.id) {
            Some(id) => err.with_id(id),
            None => err,
        }
    })?;

    validate(&config).map_err(|e| e.with_id(config.id.clone()))?;
    Ok(config)
}

/// Read, parse and validate a description file
pub fn load_equipment(path: &Path) -> Result<EquipmentConfig, ConfigurationError> {
    let format = format_of(path)?;
    let text = std::fs::read_to_string(path).map_err(|e| read_error(path, &e))?;
    parse_document(path, &text, format)
}

/// [`load_equipment`] without blocking the runtime thread
pub async fn read_equipment(path: &Path) -> Result<EquipmentConfig, ConfigurationError> {
    let format = format_of(path)?;
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| read_error(path, &e))?;
    parse_document(path, &text, format)
}

fn format_of(path: &Path) -> Result<DocumentFormat, ConfigurationError> {
    DocumentFormat::from_path(path)
        .ok_or_else(|| ConfigurationError::new("unsupported file extension").with_path(path))
}

fn read_error(path: &Path, err: &std::io::Error) -> ConfigurationError {
    ConfigurationError::new(format!("cannot read: {err}")).with_path(path)
}

fn parse_document(
    path: &Path,
    text: &str,
    format: DocumentFormat,
) -> Result<EquipmentConfig, ConfigurationError> {
    if text.trim().is_empty() {
        return Err(ConfigurationError::new("empty document").with_path(path));
    }
    parse_equipment(text, format).map_err(|e| e.with_path(path))
}

/// Semantic checks the type system cannot express
pub fn validate(config: &EquipmentConfig) -> Result<(), ConfigurationError> {
    if config.id.trim().is_empty() {
        return Err(ConfigurationError::new("equipment id is empty"));
    }
    if config.units.is_empty() {
        return Err(ConfigurationError::new("no units declared"));
    }

    let mut unit_ids = HashSet::new();
    for unit in &config.units {
        if unit.id.trim().is_empty() {
            return Err(ConfigurationError::new("unit id is empty"));
        }
        if !unit_ids.insert(unit.id.as_str()) {
            return Err(ConfigurationError::new(format!("duplicate unit id '{}'", unit.id)));
        }
        if unit.ports.is_empty() {
            return Err(ConfigurationError::new(format!("unit '{}' declares no ports", unit.id)));
        }

        let mut numbers = HashSet::new();
        for port in &unit.ports {
            if !numbers.insert(port.number) {
                return Err(ConfigurationError::new(format!(
                    "unit '{}' declares port {} twice",
                    unit.id, port.number
                )));
            }
            validate_port(port)
                .map_err(|reason| ConfigurationError::new(format!("unit '{}' port {}: {reason}", unit.id, port.number)))?;
        }
    }

    for condition in &config.critical_conditions {
        if condition.name.trim().is_empty() {
            return Err(ConfigurationError::new("critical condition without a name"));
        }
    }

    if let Some(simulation) = &config.simulation {
        validate_simulation(simulation).map_err(|reason| ConfigurationError::new(format!("simulation: {reason}")))?;
    }

    Ok(())
}

fn validate_port(port: &PortConfig) -> Result<(), String> {
    if port.speed == 0 {
        return Err("speed must be positive".to_string());
    }
    if !(5..=8).contains(&port.data_bits) {
        return Err(format!("data bits {} out of range 5-8", port.data_bits));
    }
    if !(1..=2).contains(&port.stop_bits) {
        return Err(format!("stop bits {} out of range 1-2", port.stop_bits));
    }
    if port.start.is_empty() && port.test.is_empty() && port.stop.is_empty() {
        return Err("no commands in any phase".to_string());
    }

    for phase in [Phase::Start, Phase::Test, Phase::Stop] {
        for (index, command) in port.commands(phase).iter().enumerate() {
            if command.command.trim().is_empty() {
                return Err(format!("{phase} command #{} has no text", index + 1));
            }
            if command.timeout_ms == 0 {
                return Err(format!("{phase} command '{}' has a zero timeout", command.command));
            }
        }
    }
    Ok(())
}

fn validate_simulation(simulation: &SimulationConfig) -> Result<(), String> {
    let start = &simulation.start;
    if !start.delay_seconds.is_finite() || start.delay_seconds < 0.0 {
        return Err("start delay must be a non-negative number".to_string());
    }
    if !start.repeat_interval_seconds.is_finite() || start.repeat_interval_seconds <= 0.0 {
        return Err("repeat interval must be positive".to_string());
    }
    if !start.random_variation_seconds.is_finite() || start.random_variation_seconds < 0.0 {
        return Err("random variation must be non-negative".to_string());
    }
    for (what, value) in [
        ("start delay", start.delay_seconds),
        ("repeat interval", start.repeat_interval_seconds),
        ("random variation", start.random_variation_seconds),
    ] {
        if value > MAX_SCHEDULE_SECONDS {
            return Err(format!("{what} {value}s exceeds {MAX_SCHEDULE_SECONDS}s"));
        }
    }
    if simulation.stop.cycle_count == 0 {
        return Err("stop cycle count must be at least 1".to_string());
    }
    let critical = &simulation.critical;
    if !(0.0..=1.0).contains(&critical.probability) {
        return Err(format!("critical probability {} outside 0..1", critical.probability));
    }
    if critical.enabled && critical.pattern.trim().is_empty() {
        return Err("critical injection enabled without a pattern".to_string());
    }
    Ok(())
}
