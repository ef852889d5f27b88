//! Simulated UUT transport
//!
//! Answers the bench command set the way the dummy UUT fixtures do, so a
//! description can run end to end without hardware attached. Scripted
//! replies take priority over the built-in table.

use super::{Framing, PortTarget, Transport, TransportError, TransportSession};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Scripted reply for one command
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    /// Send this line
    Text(String),
    /// Send nothing (the caller times out)
    Silent,
}

/// Fixed single-UUT command table
const COMMAND_TABLE: &[(&str, &str)] = &[
    ("ATZ", "OK"),
    ("INIT_RS232", "READY"),
    ("AT+STATUS", "STATUS_OK"),
    ("RUN_TEST_1", "PASS"),
    ("TEST", "PASS"),
    ("AT+QUIT", "GOODBYE"),
    ("STOP_RS232", "BYE"),
    ("EXIT", "BYE"),
    ("AT+SHUTDOWN", "SHUTDOWN_OK"),
    ("MAIN_POWER_ON", "MAIN_POWER:ON"),
    ("MAIN_INIT", "MAIN_INIT:OK"),
    ("MAIN_TEST_STATUS", "MAIN_STATUS:READY"),
    ("MAIN_SELF_TEST", "MAIN_SELF_TEST:PASS"),
    ("MAIN_SHUTDOWN", "MAIN_SHUTDOWN:OK"),
];

/// Split `PORT<n>_<OP>` into its number and operation
fn split_port_command(command: &str) -> Option<(&str, &str)> {
    let (num, op) = command.strip_prefix("PORT")?.split_once('_')?;
    if num.is_empty() || !num.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((num, op))
}

/// Reply of the built-in table for a trimmed command line
fn builtin_reply(command: &str) -> String {
    if let Some((_, reply)) = COMMAND_TABLE.iter().find(|(cmd, _)| *cmd == command) {
        return (*reply).to_string();
    }

    if let Some((num, op)) = split_port_command(command) {
        return match op {
            "ENABLE" => format!("PORT{num}:ENABLED"),
            "TEST" => format!("PORT{num}:TEST_OK"),
            "DATA_CHECK" => format!("PORT{num}:DATA_VALID"),
            "DISABLE" => format!("PORT{num}:DISABLED"),
            _ => format!("PORT{num}_UNKNOWN_CMD:{command}"),
        };
    }

    if command.starts_with("MAIN_") {
        return format!("MAIN_UNKNOWN_CMD:{command}");
    }

    "ERROR: Unknown command".to_string()
}

/// Synthetic UUT shared by every session opened through it
#[derive(Debug, Clone, Default)]
pub struct SimulatedUut {
    script: Arc<RwLock<HashMap<String, Reply>>>,
    latency: Duration,
    log: Arc<RwLock<Vec<(String, String)>>>,
}

impl SimulatedUut {
    /// Create a UUT answering the built-in command table
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied before every reply
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script a reply for a command
    #[must_use]
    pub fn with_reply(self, command: &str, reply: &str) -> Self {
        self.set_reply(command, reply);
        self
    }

    /// Script silence for a command, so the caller runs into its timeout
    #[must_use]
    pub fn with_silence(self, command: &str) -> Self {
        self.script.write().insert(command.to_string(), Reply::Silent);
        self
    }

    /// Replace the scripted reply of a command at runtime
    pub fn set_reply(&self, command: &str, reply: &str) {
        self.script
            .write()
            .insert(command.to_string(), Reply::Text(reply.to_string()));
    }

    /// Commands received so far, with the session selector they arrived on
    pub fn received(&self) -> Vec<(String, String)> {
        self.log.read().clone()
    }

    /// Reply the UUT gives for a command line
    pub fn respond(&self, command: &str) -> Option<String> {
        let command = command.trim();
        match self.script.read().get(command) {
            Some(Reply::Text(text)) => Some(text.clone()),
            Some(Reply::Silent) => None,
            None => Some(builtin_reply(command)),
        }
    }
}

#[async_trait]
impl Transport for SimulatedUut {
    async fn open(
        &self,
        target: &PortTarget,
        framing: &Framing,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        tracing::debug!(port = %target, framing = %framing, "simulated session opened");
        Ok(Box::new(SimulatedSession {
            uut: self.clone(),
            selector: target.selector().to_string(),
            outbox: VecDeque::new(),
            open: true,
        }))
    }
}

/// Session against a [`SimulatedUut`]
#[derive(Debug)]
pub struct SimulatedSession {
    uut: SimulatedUut,
    selector: String,
    outbox: VecDeque<String>,
    open: bool,
}

#[async_trait]
impl TransportSession for SimulatedSession {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Disconnected);
        }

        let text = String::from_utf8_lossy(data);
        for line in text.split(['\r', '\n']).filter(|l| !l.trim().is_empty()) {
            self.uut
                .log
                .write()
                .push((self.selector.clone(), line.trim().to_string()));
            if let Some(reply) = self.uut.respond(line) {
                self.outbox.push_back(reply);
            }
        }
        Ok(())
    }

    async fn receive_until(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        if !self.open {
            return Err(TransportError::Disconnected);
        }

        match self.outbox.pop_front() {
            Some(reply) if self.uut.latency <= timeout => {
                tokio::time::sleep(self.uut.latency).await;
                Ok(Bytes::from(format!("{reply}\r\n")))
            }
            _ => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        self.outbox.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let uut = SimulatedUut::new();
        assert_eq!(uut.respond("ATZ").as_deref(), Some("OK"));
        assert_eq!(uut.respond("INIT_RS232\r\n").as_deref(), Some("READY"));
        assert_eq!(uut.respond("PORT2_TEST").as_deref(), Some("PORT2:TEST_OK"));
        assert_eq!(
            uut.respond("PORT3_REBOOT").as_deref(),
            Some("PORT3_UNKNOWN_CMD:PORT3_REBOOT")
        );
        assert_eq!(uut.respond("MAIN_FOO").as_deref(), Some("MAIN_UNKNOWN_CMD:MAIN_FOO"));
        assert_eq!(uut.respond("HELLO").as_deref(), Some("ERROR: Unknown command"));
    }

    #[test]
    fn test_scripted_reply_overrides_table() {
        let uut = SimulatedUut::new().with_reply("TEST", "FAULT").with_silence("ATZ");
        assert_eq!(uut.respond("TEST").as_deref(), Some("FAULT"));
        assert_eq!(uut.respond("ATZ"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_round_trip() {
        let uut = SimulatedUut::new();
        let target = PortTarget::Simulated("COM11".into());
        let mut session = uut.open(&target, &Framing::default()).await.unwrap();

        session.send(b"ATZ\r\n").await.unwrap();
        let reply = session.receive_until(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&reply[..], b"OK\r\n");

        let timed_out = session.receive_until(Duration::from_millis(200)).await;
        assert!(matches!(timed_out, Err(TransportError::Timeout(_))));

        session.close().await.unwrap();
        assert!(matches!(session.send(b"ATZ").await, Err(TransportError::Disconnected)));
        assert_eq!(uut.received(), vec![("COM11".to_string(), "ATZ".to_string())]);
    }
}
