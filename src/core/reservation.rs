//! Process-wide port reservation table
//!
//! At most one session per physical port, across every equipment instance.
//! Contention fails immediately with [`ResourceConflictError`]; nothing ever
//! queues on a port.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::error::ResourceConflictError;

#[derive(Debug, Clone)]
struct Entry {
    token: Uuid,
    holder: String,
}

/// Shared map from port identity to the live reservation
#[derive(Debug, Clone, Default)]
pub struct PortReservationTable {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl PortReservationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `port` for `holder`, or fail immediately if it is taken
    ///
    /// The reservation is released when the returned guard is dropped.
    pub fn try_reserve(
        &self,
        port: &str,
        holder: &str,
    ) -> Result<PortReservation, ResourceConflictError> {
        let mut table = self.inner.lock();
        if let Some(existing) = table.get(port) {
            return Err(ResourceConflictError {
                port: port.to_string(),
                holder: existing.holder.clone(),
            });
        }

        let token = Uuid::new_v4();
        table.insert(
            port.to_string(),
            Entry {
                token,
                holder: holder.to_string(),
            },
        );
        tracing::trace!(port, holder, "port reserved");

        Ok(PortReservation {
            table: Arc::downgrade(&self.inner),
            port: port.to_string(),
            token,
        })
    }

    /// Current holder of a port, if reserved
    pub fn holder(&self, port: &str) -> Option<String> {
        self.inner.lock().get(port).map(|e| e.holder.clone())
    }

    /// Number of live reservations
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no port is reserved
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Live reservation; releases the port on drop
#[derive(Debug)]
pub struct PortReservation {
    table: Weak<Mutex<HashMap<String, Entry>>>,
    port: String,
    token: Uuid,
}

impl PortReservation {
    /// Reserved port identity
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Token identifying this reservation
    pub fn token(&self) -> Uuid {
        self.token
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.lock();
        // Only remove our own entry
        if table.get(&self.port).is_some_and(|e| e.token == self.token) {
            table.remove(&self.port);
            tracing::trace!(port = %self.port, "port released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_reservation_conflicts() {
        let table = PortReservationTable::new();
        let first = table.try_reserve("COM11", "bib_a/uut1/1").unwrap();
        let err = table.try_reserve("COM11", "bib_b/uut1/1").unwrap_err();
        assert_eq!(err.holder, "bib_a/uut1/1");
        assert_eq!(first.port(), "COM11");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let table = PortReservationTable::new();
        {
            let _guard = table.try_reserve("COM11", "a").unwrap();
            assert_eq!(table.holder("COM11").as_deref(), Some("a"));
        }
        assert!(table.is_empty());
        assert!(table.try_reserve("COM11", "b").is_ok());
    }

    #[test]
    fn test_distinct_ports_do_not_conflict() {
        let table = PortReservationTable::new();
        let _a = table.try_reserve("COM11", "a").unwrap();
        let _b = table.try_reserve("COM12", "a").unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_concurrent_reservations_exactly_one_wins() {
        let table = PortReservationTable::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    table.try_reserve("COM7", &format!("holder{i}"))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 7);
    }
}
