//! Core module containing the bench engine
//!
//! This module provides:
//! - Equipment description model, loading and validation
//! - Multi-level response classification (PASS/WARN/FAIL/CRITICAL)
//! - Start/Test/Stop workflow execution per port
//! - Hardware and simulated trigger sources
//! - Per-equipment control loops with a lifecycle state machine
//! - A registry kept in step with a watched directory
//! - Process-wide port reservation
//! - Result aggregation and reporting
//! - Transports (serial, simulated UUT) and bench signal I/O

pub mod controller;
pub mod error;
pub mod hardware;
pub mod loader;
pub mod model;
pub mod registry;
pub mod report;
pub mod reservation;
pub mod resolver;
pub mod state_machine;
pub mod transport;
pub mod trigger;
pub mod validation;
pub mod watcher;
pub mod workflow;
