//! Hardware trigger: debounced rising edges of bench input lines

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{TriggerEvent, TriggerSettings};
use crate::core::hardware::HardwareSignalProvider;
use crate::core::model::HardwareTriggerConfig;

/// Debounced view of one input line
#[derive(Debug)]
struct Line {
    name: String,
    /// Accepted level; `None` until the first successful read
    stable: Option<bool>,
    candidate: bool,
    since: Instant,
}

impl Line {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stable: None,
            candidate: false,
            since: Instant::now(),
        }
    }

    /// Feed one raw sample; true on an accepted rising edge
    fn sample(&mut self, raw: bool, now: Instant, debounce: Duration) -> bool {
        let Some(stable) = self.stable else {
            // The level found at startup is not an edge
            self.stable = Some(raw);
            self.candidate = raw;
            self.since = now;
            return false;
        };

        if raw != self.candidate {
            self.candidate = raw;
            self.since = now;
        }
        if self.candidate != stable && now.duration_since(self.since) >= debounce {
            self.stable = Some(self.candidate);
            return self.candidate;
        }
        false
    }
}

/// Polls a [`HardwareSignalProvider`] for start/stop edges
pub struct HardwareTrigger {
    signals: Arc<dyn HardwareSignalProvider>,
    start: Line,
    stop: Line,
    poll_interval: Duration,
    debounce: Duration,
    /// Stop edge accepted in the same poll as a Start edge
    pending: Option<TriggerEvent>,
}

impl HardwareTrigger {
    /// Create a trigger on two input lines
    pub fn new(
        signals: Arc<dyn HardwareSignalProvider>,
        start_input: &str,
        stop_input: &str,
        poll_interval: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            signals,
            start: Line::new(start_input),
            stop: Line::new(stop_input),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            debounce,
            pending: None,
        }
    }

    /// Service defaults overridden by a description's wiring block
    pub fn from_config(
        wiring: &HardwareTriggerConfig,
        settings: &TriggerSettings,
        signals: Arc<dyn HardwareSignalProvider>,
    ) -> Self {
        Self::new(
            signals,
            wiring.start_input.as_deref().unwrap_or(&settings.start_input),
            wiring.stop_input.as_deref().unwrap_or(&settings.stop_input),
            wiring
                .poll_interval_ms
                .map_or(settings.poll_interval, Duration::from_millis),
            wiring.debounce_ms.map_or(settings.debounce, Duration::from_millis),
        )
    }

    async fn poll_line(&mut self, which: TriggerEvent, now: Instant) -> bool {
        let line = match which {
            TriggerEvent::Start => &mut self.start,
            TriggerEvent::Stop => &mut self.stop,
        };
        match self.signals.read_input(&line.name).await {
            Ok(raw) => line.sample(raw, now, self.debounce),
            Err(err) => {
                tracing::warn!(input = %line.name, error = %err, "input read failed, retrying");
                false
            }
        }
    }

    /// Wait for the next debounced edge
    pub async fn next_event(&mut self, cancel: &CancellationToken) -> Option<TriggerEvent> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(event) = self.pending.take() {
                return Some(event);
            }

            let now = Instant::now();
            let start = self.poll_line(TriggerEvent::Start, now).await;
            let stop = self.poll_line(TriggerEvent::Stop, now).await;
            if start {
                tracing::debug!(input = %self.start.name, "start edge");
                if stop {
                    tracing::debug!(input = %self.stop.name, "stop edge queued behind start");
                    self.pending = Some(TriggerEvent::Stop);
                }
                return Some(TriggerEvent::Start);
            }
            if stop {
                tracing::debug!(input = %self.stop.name, "stop edge");
                return Some(TriggerEvent::Stop);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hardware::SignalBoard;

    fn trigger(board: &SignalBoard) -> HardwareTrigger {
        HardwareTrigger::new(
            Arc::new(board.clone()),
            "START",
            "STOP",
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_line_debounce() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut line = Line::new("START");

        assert!(!line.sample(false, t0, ms(50)));
        assert!(!line.sample(true, t0 + ms(10), ms(50)));
        assert!(!line.sample(false, t0 + ms(30), ms(50)));
        assert!(!line.sample(true, t0 + ms(40), ms(50)));
        assert!(!line.sample(true, t0 + ms(80), ms(50)));
        assert!(line.sample(true, t0 + ms(90), ms(50)));
        // Held high: no second edge
        assert!(!line.sample(true, t0 + ms(500), ms(50)));
        // Falling edge is accepted silently
        assert!(!line.sample(false, t0 + ms(510), ms(50)));
        assert!(!line.sample(false, t0 + ms(560), ms(50)));
        assert!(!line.sample(true, t0 + ms(570), ms(50)));
        assert!(line.sample(true, t0 + ms(620), ms(50)));
    }

    #[test]
    fn test_level_at_startup_is_not_an_edge() {
        let t0 = Instant::now();
        let mut line = Line::new("START");
        assert!(!line.sample(true, t0, Duration::ZERO));
        assert!(!line.sample(true, t0 + Duration::from_secs(1), Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rising_edges_emit_events() {
        let board = SignalBoard::new();
        let mut trigger = trigger(&board);
        let cancel = CancellationToken::new();

        let driver = {
            let board = board.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                board.set_input("START", true);
                tokio::time::sleep(Duration::from_millis(200)).await;
                board.set_input("STOP", true);
            })
        };

        assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Start));
        assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Stop));
        driver.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_simultaneous_edges_yield_start_then_stop() {
        let board = SignalBoard::new();
        let mut trigger = trigger(&board);
        let cancel = CancellationToken::new();

        let driver = {
            let board = board.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                board.set_input("START", true);
                board.set_input("STOP", true);
            })
        };

        assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Start));
        let at_start = Instant::now();
        assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Stop));
        assert_eq!(Instant::now(), at_start);
        driver.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_glitch_is_ignored_and_cancel_ends() {
        let board = SignalBoard::new();
        let mut trigger = trigger(&board);
        let cancel = CancellationToken::new();

        let driver = {
            let board = board.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                board.set_input("START", true);
                tokio::time::sleep(Duration::from_millis(20)).await;
                board.set_input("START", false);
                tokio::time::sleep(Duration::from_millis(500)).await;
                cancel.cancel();
            })
        };

        assert_eq!(trigger.next_event(&cancel).await, None);
        driver.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_errors_are_retried() {
        let board = SignalBoard::new();
        board.inject_fault("START", "bus error");
        let mut trigger = trigger(&board);
        let cancel = CancellationToken::new();

        let driver = {
            let board = board.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                board.clear_fault("START");
                tokio::time::sleep(Duration::from_millis(100)).await;
                board.set_input("START", true);
            })
        };

        assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Start));
        driver.await.unwrap();
    }
}
