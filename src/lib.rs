//! # bibrunner core library
//!
//! Orchestration of burn-in board (BIB) test benches:
//! - Declarative equipment descriptions (TOML, JSON, YAML)
//! - Start/Test/Stop command scripts per port with multi-level validation
//! - Hardware or simulated triggers per equipment
//! - Hot add, update and removal of equipment from a watched directory
//! - Exclusive port reservation across all running equipment
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bibrunner_core::{
//!     ControllerContext, DefaultResolver, PortReservationTable, Registry, SignalBoard,
//!     SimulatedUut, TriggerSettings, WatcherSettings, WorkflowExecutor,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let board = Arc::new(SignalBoard::new());
//!     let ctx = ControllerContext::new(
//!         WorkflowExecutor::new(PortReservationTable::new(), board.clone()),
//!         Arc::new(DefaultResolver::new(SimulatedUut::new())),
//!         board,
//!         TriggerSettings::default(),
//!     );
//!     let registry = Registry::new(ctx);
//!
//!     let mut reports = registry.subscribe();
//!     let cancel = CancellationToken::new();
//!     registry.spawn_watch("/etc/bib".into(), WatcherSettings::default(), cancel.clone());
//!
//!     while let Ok(report) = reports.recv().await {
//!         println!("{} cycle {}: {}", report.equipment_id, report.cycle, report.result.highest_level);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, LoggingSettings};
pub use crate::core::controller::{
    run_cycle, ControllerContext, EquipmentController, InstanceHandle, InstanceSnapshot,
};
pub use crate::core::error::{
    ConfigurationError, HardwareSignalError, RegistryError, ResourceConflictError, WorkflowError,
};
pub use crate::core::hardware::{HardwareSignalProvider, SignalBoard};
pub use crate::core::loader::{
    load_equipment, parse_equipment, read_equipment, validate, DocumentFormat,
};
pub use crate::core::model::{
    Command, CompiledPattern, CriticalCondition, EquipmentConfig, LevelPattern, LevelPatterns,
    Phase, PortConfig, SimulationConfig, UnitConfig,
};
pub use crate::core::registry::{Registry, RegistryAction};
pub use crate::core::report::{
    AggregatedResult, CycleReport, MultiEquipmentResult, UnitResult, WorkflowResult,
};
pub use crate::core::reservation::{PortReservation, PortReservationTable};
pub use crate::core::resolver::{DefaultResolver, PortResolver, ResolvedPort};
pub use crate::core::state_machine::InstanceStatus;
pub use crate::core::transport::{
    Framing, PortTarget, SerialTransport, SimulatedUut, Transport, TransportError,
    TransportSession,
};
pub use crate::core::trigger::{TriggerEvent, TriggerSettings, TriggerSource};
pub use crate::core::validation::{classify, classify_command, ValidationLevel, ValidationResult};
pub use crate::core::watcher::WatcherSettings;
pub use crate::core::workflow::{PortJob, WorkflowExecutor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
