//! Error taxonomy for the bench engine
//!
//! Recoverable conditions (timeouts, bad responses, busy ports) end up as
//! [`ValidationResult`](crate::core::validation::ValidationResult) values.
//! The types here only cover what has to travel up to a loop boundary.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::transport::TransportError;

/// A description that could not be parsed or failed semantic validation
#[derive(Debug, Clone)]
pub struct ConfigurationError {
    /// Source document, when loaded from disk
    pub path: Option<PathBuf>,
    /// Equipment id, when it could be read before the failure
    pub id: Option<String>,
    /// Human readable reason
    pub reason: String,
}

impl ConfigurationError {
    /// Create an error with a reason only
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            path: None,
            id: None,
            reason: reason.into(),
        }
    }

    /// Attach the offending equipment id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach the source path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} rejected", path.display())?,
            None => write!(f, "configuration rejected")?,
        }
        if let Some(id) = &self.id {
            write!(f, " (id '{id}')")?;
        }
        write!(f, ": {}", self.reason)
    }
}

impl std::error::Error for ConfigurationError {}

/// A port is already held by another session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("port {port} already reserved by {holder}")]
pub struct ResourceConflictError {
    /// Port identity that was requested
    pub port: String,
    /// Owner of the live reservation
    pub holder: String,
}

/// Failure talking to the hardware signal collaborator
#[derive(Error, Debug, Clone)]
pub enum HardwareSignalError {
    /// Provider reported an I/O problem
    #[error("signal I/O failed on {name}: {reason}")]
    Io {
        /// Signal name
        name: String,
        /// Reason reported by the provider
        reason: String,
    },
}

/// Errors that abort a whole port run
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Transport could not be opened for the port
    #[error("cannot open {port}: {source}")]
    Open {
        /// Port identity
        port: String,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },
}

/// Errors surfaced by the registry API
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Description rejected
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Registry is shutting down and accepts no new instances
    #[error("registry is shutting down")]
    ShuttingDown,
    /// Watch directory could not be read
    #[error("cannot watch {path}: {source}")]
    Watch {
        /// Directory being watched
        path: PathBuf,
        /// I/O failure
        #[source]
        source: std::io::Error,
    },
}
