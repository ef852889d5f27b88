//! Port resolution
//!
//! Maps a configured port to the transport that serves it. Physical serial
//! ports win when the system enumerates them; everything else falls back to
//! the synthetic UUT. A named port keeps its name as identity, so two
//! descriptions claiming one device still contend; an unnamed simulated port
//! belongs to its owner alone.

use std::sync::Arc;

use super::model::PortConfig;
use super::transport::{available_port_names, PortTarget, SerialTransport, SimulatedUut, Transport};

/// A port bound to its transport
#[derive(Clone)]
pub struct ResolvedPort {
    /// Where sessions go
    pub target: PortTarget,
    /// Opens sessions against `target`
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ResolvedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedPort").field("target", &self.target).finish_non_exhaustive()
    }
}

/// Maps configured ports to transports
pub trait PortResolver: Send + Sync {
    /// Resolve one port of `owner` (`equipment/unit`)
    fn resolve(&self, owner: &str, port: &PortConfig) -> ResolvedPort;
}

/// Serial when enumerated, simulated otherwise
pub struct DefaultResolver {
    available: Vec<String>,
    serial: Arc<SerialTransport>,
    simulated: Arc<SimulatedUut>,
}

impl DefaultResolver {
    /// Enumerate system serial ports now
    pub fn new(simulated: SimulatedUut) -> Self {
        let available = available_port_names();
        tracing::debug!(ports = ?available, "serial ports enumerated");
        Self::with_available(available, simulated)
    }

    /// Use a fixed list of physical port names
    pub fn with_available(available: Vec<String>, simulated: SimulatedUut) -> Self {
        Self {
            available,
            serial: Arc::new(SerialTransport::new()),
            simulated: Arc::new(simulated),
        }
    }

    /// Route every port to the synthetic UUT
    pub fn simulated_only(simulated: SimulatedUut) -> Self {
        Self::with_available(Vec::new(), simulated)
    }

    fn physical_match(&self, selector: &str) -> Option<&str> {
        self.available
            .iter()
            .find(|name| name.eq_ignore_ascii_case(selector))
            .map(String::as_str)
    }
}

impl PortResolver for DefaultResolver {
    fn resolve(&self, owner: &str, port: &PortConfig) -> ResolvedPort {
        let selector = port.selector();
        if let Some(name) = self.physical_match(&selector) {
            return ResolvedPort {
                target: PortTarget::Serial(name.to_string()),
                transport: self.serial.clone(),
            };
        }

        let selector = if port.name.is_some() {
            selector
        } else {
            format!("{owner}/{}", port.number)
        };
        ResolvedPort {
            target: PortTarget::Simulated(selector),
            transport: self.simulated.clone(),
        }
    }
}
