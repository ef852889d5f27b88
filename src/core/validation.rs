//! Multi-level response classification
//!
//! Severity decides precedence, never declaration order:
//! CRITICAL, then FAIL, then WARN, then the primary expectation for PASS.
//! The first level that matches wins. Classification is a pure function of
//! its inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::model::{Command, CompiledPattern, CriticalCondition, LevelPattern, LevelPatterns};

/// Message of a response no level accounted for
pub const NO_MATCH_MESSAGE: &str = "no expected pattern matched";

/// Severity of a classified response
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationLevel {
    /// Expected response
    #[default]
    Pass,
    /// Acceptable but noteworthy
    Warn,
    /// Command failed
    Fail,
    /// Emergency stop condition
    Critical,
}

impl ValidationLevel {
    /// FAIL or CRITICAL
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Critical)
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Warn => write!(f, "WARN"),
            Self::Fail => write!(f, "FAIL"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Outcome of classifying one command execution
///
/// Built once per command and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    level: ValidationLevel,
    message: String,
    response: String,
    matched_pattern: Option<String>,
    captures: BTreeMap<String, String>,
    should_continue_workflow: bool,
    should_trigger_hardware_signal: bool,
}

impl ValidationResult {
    /// Severity
    pub fn level(&self) -> ValidationLevel {
        self.level
    }

    /// Human readable explanation
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Response text that was classified (trimmed)
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Pattern that decided the level, if any
    pub fn matched_pattern(&self) -> Option<&str> {
        self.matched_pattern.as_deref()
    }

    /// Named capture groups of the deciding pattern
    pub fn captures(&self) -> &BTreeMap<String, String> {
        &self.captures
    }

    /// Whether the phase may go on after this command
    pub fn should_continue_workflow(&self) -> bool {
        self.should_continue_workflow
    }

    /// Whether the critical-fail output must be asserted
    pub fn should_trigger_hardware_signal(&self) -> bool {
        self.should_trigger_hardware_signal
    }

    /// FAIL for a command that never got a response (timeout, I/O, busy port)
    pub fn command_failure(message: impl Into<String>, continue_on_failure: bool) -> Self {
        Self {
            level: ValidationLevel::Fail,
            message: message.into(),
            response: String::new(),
            matched_pattern: None,
            captures: BTreeMap::new(),
            should_continue_workflow: continue_on_failure,
            should_trigger_hardware_signal: false,
        }
    }
}

/// Primary expectation of a command
#[derive(Debug, Clone, Copy)]
pub enum Expectation<'a> {
    /// Trimmed response equals this text; empty accepts any response
    Exact(&'a str),
    /// Response matches this regex
    Pattern(&'a CompiledPattern),
}

struct Hit {
    level: ValidationLevel,
    message: String,
    pattern: String,
    captures: BTreeMap<String, String>,
    trigger_hardware: bool,
}

fn named_captures(pattern: &CompiledPattern, text: &str) -> Option<BTreeMap<String, String>> {
    let regex = pattern.regex();
    let caps = regex.captures(text)?;
    Some(
        regex
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect(),
    )
}

fn level_hit(level: ValidationLevel, entry: Option<&LevelPattern>, text: &str) -> Option<Hit> {
    let entry = entry?;
    let captures = named_captures(&entry.pattern, text)?;
    Some(Hit {
        level,
        message: format!("{} pattern '{}' matched", level.to_string().to_lowercase(), entry.pattern.as_str()),
        pattern: entry.pattern.as_str().to_string(),
        captures,
        trigger_hardware: level == ValidationLevel::Critical && entry.trigger_hardware,
    })
}

fn evaluate(
    text: &str,
    expected: Expectation<'_>,
    levels: &LevelPatterns,
    conditions: &[CriticalCondition],
) -> Option<Hit> {
    let equipment_critical = conditions.iter().find_map(|condition| {
        named_captures(&condition.pattern, text).map(|captures| Hit {
            level: ValidationLevel::Critical,
            message: format!("critical condition '{}' matched", condition.name),
            pattern: condition.pattern.as_str().to_string(),
            captures,
            trigger_hardware: condition.trigger_hardware,
        })
    });

    equipment_critical
        .or_else(|| level_hit(ValidationLevel::Critical, levels.critical.as_ref(), text))
        .or_else(|| level_hit(ValidationLevel::Fail, levels.fail.as_ref(), text))
        .or_else(|| level_hit(ValidationLevel::Warn, levels.warn.as_ref(), text))
        .or_else(|| match expected {
            Expectation::Exact(want) => {
                let want = want.trim();
                (want.is_empty() || want == text).then(|| Hit {
                    level: ValidationLevel::Pass,
                    message: "expected response received".to_string(),
                    pattern: want.to_string(),
                    captures: BTreeMap::new(),
                    trigger_hardware: false,
                })
            }
            Expectation::Pattern(pattern) => named_captures(pattern, text).map(|captures| Hit {
                level: ValidationLevel::Pass,
                message: "expected response received".to_string(),
                pattern: pattern.as_str().to_string(),
                captures,
                trigger_hardware: false,
            }),
        })
}

fn build(response: &str, hit: Option<Hit>, continue_on_failure: bool) -> ValidationResult {
    let text = response.trim().to_string();
    match hit {
        Some(hit) => ValidationResult {
            should_continue_workflow: match hit.level {
                ValidationLevel::Pass | ValidationLevel::Warn => true,
                ValidationLevel::Fail => continue_on_failure,
                ValidationLevel::Critical => false,
            },
            should_trigger_hardware_signal: hit.trigger_hardware,
            level: hit.level,
            message: hit.message,
            response: text,
            matched_pattern: Some(hit.pattern),
            captures: hit.captures,
        },
        None => ValidationResult {
            level: ValidationLevel::Fail,
            message: NO_MATCH_MESSAGE.to_string(),
            response: text,
            matched_pattern: None,
            captures: BTreeMap::new(),
            should_continue_workflow: continue_on_failure,
            should_trigger_hardware_signal: false,
        },
    }
}

/// Classify a response against an exact primary expectation and level patterns
pub fn classify(response: &str, primary_expected: &str, levels: &LevelPatterns) -> ValidationResult {
    let hit = evaluate(response.trim(), Expectation::Exact(primary_expected), levels, &[]);
    build(response, hit, false)
}

/// Classify a response for a configured command
///
/// Equipment-wide critical conditions are checked first. The command's
/// `continue_on_failure` lets the workflow go on after FAIL, never after
/// CRITICAL.
pub fn classify_command(
    response: &str,
    command: &Command,
    conditions: &[CriticalCondition],
) -> ValidationResult {
    let expected = match &command.expect_pattern {
        Some(pattern) => Expectation::Pattern(pattern),
        None => Expectation::Exact(&command.expect),
    };
    let hit = evaluate(response.trim(), expected, &command.levels, conditions);
    build(response, hit, command.continue_on_failure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(warn: Option<&str>, fail: Option<&str>, critical: Option<(&str, bool)>) -> LevelPatterns {
        LevelPatterns {
            warn: warn.map(|p| LevelPattern::new(p, false).unwrap()),
            fail: fail.map(|p| LevelPattern::new(p, false).unwrap()),
            critical: critical.map(|(p, hw)| LevelPattern::new(p, hw).unwrap()),
        }
    }

    fn scenario_levels() -> LevelPatterns {
        levels(Some("^PASS$"), Some("^ERROR$"), Some(("^FAULT$", true)))
    }

    #[test]
    fn test_primary_match_passes() {
        let result = classify("OK\r\n", "OK", &LevelPatterns::default());
        assert_eq!(result.level(), ValidationLevel::Pass);
        assert!(result.should_continue_workflow());
        assert_eq!(result.response(), "OK");
    }

    #[test]
    fn test_warn_pattern_wins_over_missing_primary() {
        let result = classify("PASS", "NEVER", &scenario_levels());
        assert_eq!(result.level(), ValidationLevel::Warn);
        assert!(result.should_continue_workflow());
        assert!(!result.should_trigger_hardware_signal());
        assert_eq!(result.matched_pattern(), Some("^PASS$"));
    }

    #[test]
    fn test_critical_pattern_stops_and_signals() {
        let result = classify("FAULT", "NEVER", &scenario_levels());
        assert_eq!(result.level(), ValidationLevel::Critical);
        assert!(!result.should_continue_workflow());
        assert!(result.should_trigger_hardware_signal());
    }

    #[test]
    fn test_no_match_is_fail() {
        let result = classify("garbage", "OK", &scenario_levels());
        assert_eq!(result.level(), ValidationLevel::Fail);
        assert_eq!(result.message(), NO_MATCH_MESSAGE);
        assert!(!result.should_continue_workflow());
        assert_eq!(result.matched_pattern(), None);
    }

    #[test]
    fn test_severity_beats_declaration_order() {
        // Both patterns match "TEMP HIGH"; only severity decides.
        let overlapping = levels(Some("TEMP"), None, Some(("HIGH", false)));
        let result = classify("TEMP HIGH", "OK", &overlapping);
        assert_eq!(result.level(), ValidationLevel::Critical);
        assert!(!result.should_trigger_hardware_signal());

        let fail_and_warn = levels(Some(".*"), Some("ERR"), None);
        assert_eq!(classify("ERR 5", "OK", &fail_and_warn).level(), ValidationLevel::Fail);
    }

    #[test]
    fn test_level_patterns_beat_primary_match() {
        let result = classify("OK", "OK", &levels(Some("^OK$"), None, None));
        assert_eq!(result.level(), ValidationLevel::Warn);
    }

    #[test]
    fn test_classification_is_pure() {
        let lv = scenario_levels();
        for response in ["PASS", "FAULT", "ERROR", "OK", "", "  FAULT\r\n"] {
            let first = classify(response, "OK", &lv);
            for _ in 0..5 {
                assert_eq!(classify(response, "OK", &lv), first);
            }
        }
    }

    #[test]
    fn test_named_captures() {
        let lv = levels(None, Some(r"^ERR (?P<code>\d+) (?P<unit>\w+)$"), None);
        let result = classify("ERR 42 psu", "OK", &lv);
        assert_eq!(result.level(), ValidationLevel::Fail);
        assert_eq!(result.captures().get("code").map(String::as_str), Some("42"));
        assert_eq!(result.captures().get("unit").map(String::as_str), Some("psu"));
    }

    #[test]
    fn test_continue_on_failure_overrides_fail_only() {
        let command = Command::new("TEST", "NEVER")
            .continue_on_failure(true)
            .levels(scenario_levels());

        let fail = classify_command("ERROR", &command, &[]);
        assert_eq!(fail.level(), ValidationLevel::Fail);
        assert!(fail.should_continue_workflow());

        let unmatched = classify_command("???", &command, &[]);
        assert!(unmatched.should_continue_workflow());

        let critical = classify_command("FAULT", &command, &[]);
        assert_eq!(critical.level(), ValidationLevel::Critical);
        assert!(!critical.should_continue_workflow());
    }

    #[test]
    fn test_equipment_critical_conditions() {
        let command = Command::new("TEST", "PASS");
        let conditions = vec![CriticalCondition {
            name: "overcurrent".to_string(),
            pattern: CompiledPattern::new(r"OVERCURRENT (?P<amps>\d+)A").unwrap(),
            trigger_hardware: true,
        }];

        let result = classify_command("PASS OVERCURRENT 12A", &command, &conditions);
        assert_eq!(result.level(), ValidationLevel::Critical);
        assert!(result.should_trigger_hardware_signal());
        assert_eq!(result.message(), "critical condition 'overcurrent' matched");
        assert_eq!(result.captures().get("amps").map(String::as_str), Some("12"));

        assert_eq!(classify_command("PASS", &command, &conditions).level(), ValidationLevel::Pass);
    }

    #[test]
    fn test_expect_pattern() {
        let mut command = Command::new("AT+VER", "");
        command.expect_pattern = Some(CompiledPattern::new(r"^VER (?P<major>\d+)\.\d+$").unwrap());

        let result = classify_command("VER 3.1", &command, &[]);
        assert_eq!(result.level(), ValidationLevel::Pass);
        assert_eq!(result.captures().get("major").map(String::as_str), Some("3"));
        assert_eq!(classify_command("VER x", &command, &[]).level(), ValidationLevel::Fail);
    }

    #[test]
    fn test_empty_expectation_accepts_any_response() {
        assert_eq!(classify("whatever", "", &LevelPatterns::default()).level(), ValidationLevel::Pass);
    }

    #[test]
    fn test_level_ordering() {
        assert!(ValidationLevel::Critical > ValidationLevel::Fail);
        assert!(ValidationLevel::Fail > ValidationLevel::Warn);
        assert!(ValidationLevel::Warn > ValidationLevel::Pass);
        assert!(ValidationLevel::Fail.is_failure());
        assert!(!ValidationLevel::Warn.is_failure());
    }
}
