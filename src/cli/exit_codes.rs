//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use std::process::ExitCode;

use crate::core::error::ConfigurationError;
use crate::core::report::AggregatedResult;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Equipment description or settings rejected
    pub const CONFIG_ERROR: u8 = 8;

    /// A cycle ended in FAIL or a port error
    pub const VALIDATION_FAILED: u8 = 17;

    /// A cycle detected a CRITICAL condition
    pub const CRITICAL_DETECTED: u8 = 18;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Success without message
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success carrying a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Outcome of one cycle
    ///
    /// Any CRITICAL, Stop phase included, wins over failure. Otherwise the
    /// cycle's `success` decides, so a Stop-only FAIL still exits 0.
    pub fn from_cycle(result: &AggregatedResult) -> Self {
        let msg = format!("{}: {}", result.equipment_id, result.highest_level);
        if result.critical_count > 0 {
            Self::Error(ExitCodes::CRITICAL_DETECTED, msg)
        } else if !result.success {
            Self::Error(ExitCodes::VALIDATION_FAILED, msg)
        } else {
            Self::Success(Some(msg))
        }
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<ConfigurationError> for CliResult {
    fn from(err: ConfigurationError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(ExitCodes::ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        ExitCodes::SUCCESS => "Success",
        ExitCodes::ERROR => "General error",
        ExitCodes::INVALID_ARGS => "Invalid arguments",
        ExitCodes::CONFIG_ERROR => "Configuration error",
        ExitCodes::VALIDATION_FAILED => "Validation failed",
        ExitCodes::CRITICAL_DETECTED => "Critical condition detected",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [
        ExitCodes::SUCCESS,
        ExitCodes::ERROR,
        ExitCodes::INVALID_ARGS,
        ExitCodes::CONFIG_ERROR,
        ExitCodes::VALIDATION_FAILED,
        ExitCodes::CRITICAL_DETECTED,
    ] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
