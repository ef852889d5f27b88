//! Result trees and aggregation
//!
//! A port run produces a [`WorkflowResult`]. Port results roll up into
//! [`UnitResult`], units into an equipment-level [`AggregatedResult`], and
//! cycle reports of many instances into a [`MultiEquipmentResult`].

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::model::Phase;
use super::validation::{ValidationLevel, ValidationResult};

/// One executed command
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    /// Command text as configured
    pub command: String,
    /// Classification
    pub validation: ValidationResult,
    /// Round-trip time in milliseconds
    pub elapsed_ms: u64,
}

/// Commands executed in one phase
#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    /// Phase
    pub phase: Phase,
    /// Executed commands, in order
    pub commands: Vec<CommandResult>,
    /// Remaining commands were skipped
    pub aborted: bool,
}

impl PhaseResult {
    /// Empty result for a phase
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            commands: Vec::new(),
            aborted: false,
        }
    }

    /// Highest level among the phase's commands
    pub fn highest_level(&self) -> ValidationLevel {
        self.commands
            .iter()
            .map(|c| c.validation.level())
            .max()
            .unwrap_or_default()
    }
}

/// Outcome of one port run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    /// Equipment id
    pub equipment_id: String,
    /// Unit id
    pub unit_id: String,
    /// Port number within the unit
    pub port: u32,
    /// Resolved port identity
    pub target: String,
    /// Phases that ran
    pub phases: Vec<PhaseResult>,
    /// Highest level over every phase
    pub highest_level: ValidationLevel,
    /// Start and Test ended at WARN or better
    pub success: bool,
    /// Cancellation was observed during the run
    pub cancelled: bool,
    /// Wall time of the run in milliseconds
    pub duration_ms: u64,
    /// Named captures of the command that set `highest_level`
    pub captures: BTreeMap<String, String>,
    /// Why the critical-fail output could not be asserted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_error: Option<String>,
    /// Start time
    pub started_at: DateTime<Local>,
}

impl WorkflowResult {
    /// Result of a phase, if it ran
    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Whether the Stop phase was executed
    pub fn stop_executed(&self) -> bool {
        self.phase(Phase::Stop).is_some()
    }

    /// Label used in logs and text reports
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.equipment_id, self.unit_id, self.port)
    }
}

impl fmt::Display for WorkflowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  port {} ({}): {} {} in {} ms",
            self.port,
            self.target,
            self.highest_level,
            if self.success { "ok" } else { "FAILED" },
            self.duration_ms
        )?;
        for phase in &self.phases {
            for cmd in &phase.commands {
                writeln!(
                    f,
                    "    [{}] {:<20} {:<8} {}",
                    phase.phase,
                    cmd.command,
                    cmd.validation.level(),
                    cmd.validation.message()
                )?;
            }
            if phase.aborted {
                writeln!(f, "    [{}] aborted", phase.phase)?;
            }
        }
        if let Some(err) = &self.signal_error {
            writeln!(f, "    critical output not asserted: {err}")?;
        }
        Ok(())
    }
}

/// Port results of one unit
#[derive(Debug, Clone, Serialize)]
pub struct UnitResult {
    /// Unit id
    pub unit_id: String,
    /// Port runs, in configured order
    pub ports: Vec<WorkflowResult>,
    /// Ports whose session could not be opened
    pub errors: Vec<PortError>,
}

impl UnitResult {
    /// Empty result for a unit
    pub fn new(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            ports: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Highest level over every port
    pub fn highest_level(&self) -> ValidationLevel {
        let errored = if self.errors.is_empty() {
            ValidationLevel::Pass
        } else {
            ValidationLevel::Fail
        };
        self.ports
            .iter()
            .map(|p| p.highest_level)
            .max()
            .unwrap_or_default()
            .max(errored)
    }

    /// Every port succeeded and none errored
    pub fn success(&self) -> bool {
        self.errors.is_empty() && self.ports.iter().all(|p| p.success)
    }
}

/// A port that never got a session
#[derive(Debug, Clone, Serialize)]
pub struct PortError {
    /// Port number
    pub port: u32,
    /// Reason
    pub reason: String,
}

/// One cycle of one equipment
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResult {
    /// Equipment id
    pub equipment_id: String,
    /// Unit results
    pub units: Vec<UnitResult>,
    /// Highest level over every unit
    pub highest_level: ValidationLevel,
    /// Every unit succeeded
    pub success: bool,
    /// Number of CRITICAL classifications
    pub critical_count: usize,
    /// Cycle was cut short by cancellation
    pub cancelled: bool,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

impl AggregatedResult {
    /// Fold unit results
    pub fn from_units(equipment_id: &str, units: Vec<UnitResult>, duration_ms: u64) -> Self {
        let highest_level = units
            .iter()
            .map(UnitResult::highest_level)
            .max()
            .unwrap_or_default();
        let critical_count = units
            .iter()
            .flat_map(|u| &u.ports)
            .flat_map(|p| &p.phases)
            .flat_map(|ph| &ph.commands)
            .filter(|c| c.validation.level() == ValidationLevel::Critical)
            .count();
        let cancelled = units.iter().flat_map(|u| &u.ports).any(|p| p.cancelled);
        Self {
            equipment_id: equipment_id.to_string(),
            success: units.iter().all(UnitResult::success),
            units,
            highest_level,
            critical_count,
            cancelled,
            duration_ms,
        }
    }

    /// All port results, unit by unit
    pub fn ports(&self) -> impl Iterator<Item = &WorkflowResult> {
        self.units.iter().flat_map(|u| u.ports.iter())
    }
}

impl fmt::Display for AggregatedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} ({}, {} critical, {} ms)",
            self.equipment_id,
            self.highest_level,
            if self.success { "success" } else { "failure" },
            self.critical_count,
            self.duration_ms
        )?;
        for unit in &self.units {
            writeln!(f, " unit {}", unit.unit_id)?;
            for port in &unit.ports {
                write!(f, "{port}")?;
            }
            for err in &unit.errors {
                writeln!(f, "  port {}: ERROR {}", err.port, err.reason)?;
            }
        }
        Ok(())
    }
}

/// Published after every completed cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Equipment id
    pub equipment_id: String,
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Cycle outcome
    pub result: AggregatedResult,
}

/// Per-equipment tally across cycles
#[derive(Debug, Clone, Default, Serialize)]
pub struct EquipmentSummary {
    /// Cycles seen
    pub cycles: u64,
    /// Successful cycles
    pub passed: u64,
    /// Failed cycles
    pub failed: u64,
    /// CRITICAL classifications
    pub critical: usize,
    /// Worst level seen
    pub highest_level: ValidationLevel,
    /// Latest cycle outcome
    pub last: Option<AggregatedResult>,
}

/// Roll-up of cycle reports across equipment
#[derive(Debug, Clone, Default, Serialize)]
pub struct MultiEquipmentResult {
    /// Tally by equipment id
    pub equipment: BTreeMap<String, EquipmentSummary>,
}

impl MultiEquipmentResult {
    /// Empty roll-up
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one cycle report in
    pub fn record(&mut self, report: &CycleReport) {
        let summary = self.equipment.entry(report.equipment_id.clone()).or_default();
        summary.cycles += 1;
        if report.result.success {
            summary.passed += 1;
        } else {
            summary.failed += 1;
        }
        summary.critical += report.result.critical_count;
        summary.highest_level = summary.highest_level.max(report.result.highest_level);
        summary.last = Some(report.result.clone());
    }

    /// Fold a batch of reports
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a CycleReport>) -> Self {
        let mut result = Self::new();
        for report in reports {
            result.record(report);
        }
        result
    }

    /// Worst level over every equipment
    pub fn highest_level(&self) -> ValidationLevel {
        self.equipment
            .values()
            .map(|s| s.highest_level)
            .max()
            .unwrap_or_default()
    }

    /// Cycle counts by equipment id
    pub fn cycle_counts(&self) -> HashMap<&str, u64> {
        self.equipment
            .iter()
            .map(|(id, s)| (id.as_str(), s.cycles))
            .collect()
    }
}

impl fmt::Display for MultiEquipmentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24} {:>7} {:>7} {:>7} {:>9}  WORST", "EQUIPMENT", "CYCLES", "PASS", "FAIL", "CRITICAL")?;
        for (id, s) in &self.equipment {
            writeln!(
                f,
                "{:<24} {:>7} {:>7} {:>7} {:>9}  {}",
                id, s.cycles, s.passed, s.failed, s.critical, s.highest_level
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Command, LevelPattern, LevelPatterns};
    use crate::core::validation::classify_command;

    fn command_result(response: &str) -> CommandResult {
        let cmd = Command::new("TEST", "PASS").levels(LevelPatterns {
            critical: Some(LevelPattern::new("^FAULT$", true).unwrap()),
            ..LevelPatterns::default()
        });
        CommandResult {
            command: cmd.command.clone(),
            validation: classify_command(response, &cmd, &[]),
            elapsed_ms: 1,
        }
    }

    fn port_result(port: u32, response: &str) -> WorkflowResult {
        let mut phase = PhaseResult::new(Phase::Test);
        phase.commands.push(command_result(response));
        let highest_level = phase.highest_level();
        WorkflowResult {
            equipment_id: "bib".to_string(),
            unit_id: "uut1".to_string(),
            port,
            target: format!("sim://PORT{port}"),
            phases: vec![phase],
            highest_level,
            success: !highest_level.is_failure(),
            cancelled: false,
            duration_ms: 3,
            captures: BTreeMap::new(),
            signal_error: None,
            started_at: Local::now(),
        }
    }

    #[test]
    fn test_aggregation_takes_worst() {
        let mut unit = UnitResult::new("uut1");
        unit.ports.push(port_result(1, "PASS"));
        unit.ports.push(port_result(2, "FAULT"));
        let agg = AggregatedResult::from_units("bib", vec![unit], 10);

        assert_eq!(agg.highest_level, ValidationLevel::Critical);
        assert!(!agg.success);
        assert_eq!(agg.critical_count, 1);
        assert_eq!(agg.ports().count(), 2);
        assert!(agg.to_string().contains("CRITICAL"));
    }

    #[test]
    fn test_port_errors_fail_the_unit() {
        let mut unit = UnitResult::new("uut1");
        unit.errors.push(PortError {
            port: 1,
            reason: "cannot open".to_string(),
        });
        assert_eq!(unit.highest_level(), ValidationLevel::Fail);
        assert!(!unit.success());
    }

    #[test]
    fn test_multi_equipment_roll_up() {
        let mut ok = UnitResult::new("uut1");
        ok.ports.push(port_result(1, "PASS"));
        let mut bad = UnitResult::new("uut1");
        bad.ports.push(port_result(1, "FAULT"));

        let reports = vec![
            CycleReport {
                equipment_id: "a".to_string(),
                cycle: 1,
                result: AggregatedResult::from_units("a", vec![ok.clone()], 1),
            },
            CycleReport {
                equipment_id: "a".to_string(),
                cycle: 2,
                result: AggregatedResult::from_units("a", vec![bad], 1),
            },
            CycleReport {
                equipment_id: "b".to_string(),
                cycle: 1,
                result: AggregatedResult::from_units("b", vec![ok], 1),
            },
        ];

        let multi = MultiEquipmentResult::from_reports(&reports);
        let a = &multi.equipment["a"];
        assert_eq!((a.cycles, a.passed, a.failed, a.critical), (2, 1, 1, 1));
        assert_eq!(multi.cycle_counts()["b"], 1);
        assert_eq!(multi.highest_level(), ValidationLevel::Critical);

        let json = serde_json::to_value(&multi).unwrap();
        assert_eq!(json["equipment"]["a"]["highest_level"], "CRITICAL");
    }
}
