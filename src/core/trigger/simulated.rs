//! Simulated trigger: timer schedule, cycle-count stops, critical injection

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::TriggerEvent;
use crate::core::model::{SimulationConfig, MAX_SCHEDULE_SECONDS};

/// Stand-in for "never" when a deadline cannot be represented
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Seconds to a duration, clamped to `0..=MAX_SCHEDULE_SECONDS`
fn schedule_duration(secs: f64) -> Duration {
    let secs = if secs.is_nan() { 0.0 } else { secs.clamp(0.0, MAX_SCHEDULE_SECONDS) };
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

/// Timer-driven trigger of one instance
///
/// Owns its random source; nothing is shared with other instances.
pub struct SimulatedTrigger {
    config: SimulationConfig,
    tick: Duration,
    rng: StdRng,
    next_start: Instant,
    cycles_since_stop: u32,
    stop_after: u32,
    cycles: u64,
    armed: Option<String>,
}

impl SimulatedTrigger {
    /// Create a trigger; the first Start fires after `delay_seconds`
    pub fn new(config: SimulationConfig, tick: Duration) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let stop_after = Self::draw_stop_after(&mut rng, &config);
        let delay = schedule_duration(config.start.delay_seconds);
        Self {
            next_start: deadline(Instant::now(), delay),
            tick: tick.max(Duration::from_millis(1)),
            rng,
            stop_after,
            cycles_since_stop: 0,
            cycles: 0,
            armed: None,
            config,
        }
    }

    fn draw_stop_after(rng: &mut StdRng, config: &SimulationConfig) -> u32 {
        let count = config.stop.cycle_count.max(1);
        let variation = config.stop.variation;
        if variation == 0 {
            return count;
        }
        let low = count.saturating_sub(variation).max(1);
        let high = count.saturating_add(variation);
        rng.gen_range(low..=high)
    }

    fn draw_interval(&mut self) -> Duration {
        let start = &self.config.start;
        let mut secs = start.repeat_interval_seconds;
        if start.random_variation_seconds > 0.0 {
            let v = start.random_variation_seconds;
            secs += self.rng.gen_range(-v..=v);
        }
        schedule_duration(secs)
    }

    fn arm_critical(&mut self) {
        let critical = &self.config.critical;
        if !critical.enabled || self.cycles < critical.min_cycles {
            return;
        }
        let probability = critical.probability;
        if self.rng.gen::<f64>() < probability {
            tracing::info!(cycle = self.cycles + 1, pattern = %critical.pattern, "critical fault injected");
            self.armed = Some(critical.pattern.clone());
        }
    }

    /// Response override armed for the cycle just started
    pub fn take_response_override(&mut self) -> Option<String> {
        self.armed.take()
    }

    /// Cycles started since the last Stop
    pub fn cycles_since_stop(&self) -> u32 {
        self.cycles_since_stop
    }

    /// Wait for the next event
    pub async fn next_event(&mut self, cancel: &CancellationToken) -> Option<TriggerEvent> {
        if cancel.is_cancelled() {
            return None;
        }

        if self.cycles_since_stop >= self.stop_after {
            self.cycles_since_stop = 0;
            self.stop_after = Self::draw_stop_after(&mut self.rng, &self.config);
            return Some(TriggerEvent::Stop);
        }

        loop {
            let remaining = self.next_start.saturating_duration_since(Instant::now());
            if remaining < Duration::from_millis(1) {
                break;
            }
            let step = remaining.min(self.tick);
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(step) => {}
            }
        }

        let fired = Instant::now();
        self.armed = None;
        self.arm_critical();
        self.cycles += 1;
        self.cycles_since_stop += 1;
        self.next_start = deadline(fired, self.draw_interval());
        Some(TriggerEvent::Start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{CriticalTrigger, StartTrigger, StopTrigger};

    fn config(delay: f64, interval: f64, cycles: u32) -> SimulationConfig {
        SimulationConfig {
            enabled: true,
            start: StartTrigger {
                delay_seconds: delay,
                repeat_interval_seconds: interval,
                random_variation_seconds: 0.0,
            },
            stop: StopTrigger {
                cycle_count: cycles,
                variation: 0,
            },
            critical: CriticalTrigger::default(),
            seed: Some(7),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule() {
        let t0 = Instant::now();
        let mut trigger = SimulatedTrigger::new(config(2.0, 5.0, 2), Duration::from_secs(1));
        let cancel = CancellationToken::new();

        assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Start));
        assert_eq!(t0.elapsed(), Duration::from_secs(2));
        assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Start));
        assert_eq!(t0.elapsed(), Duration::from_secs(7));
        assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Stop));
        assert_eq!(t0.elapsed(), Duration::from_secs(7));
        assert_eq!(trigger.cycles_since_stop(), 0);
        assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Start));
        assert_eq!(t0.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_stays_in_bounds_and_seed_repeats() {
        let mut cfg = config(0.0, 10.0, 100);
        cfg.start.random_variation_seconds = 3.0;

        let mut gaps = Vec::new();
        for _ in 0..2 {
            let cancel = CancellationToken::new();
            let mut trigger = SimulatedTrigger::new(cfg.clone(), Duration::from_millis(100));
            let mut last = Instant::now();
            let mut run = Vec::new();
            for _ in 0..6 {
                assert_eq!(trigger.next_event(&cancel).await, Some(TriggerEvent::Start));
                run.push(last.elapsed());
                last = Instant::now();
            }
            gaps.push(run);
        }

        assert_eq!(gaps[0], gaps[1]);
        for gap in &gaps[0][1..] {
            assert!(*gap >= Duration::from_secs(7) && *gap <= Duration::from_secs(13), "{gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_injection_after_min_cycles() {
        let mut cfg = config(0.0, 1.0, 100);
        cfg.critical = CriticalTrigger {
            enabled: true,
            min_cycles: 2,
            probability: 1.0,
            pattern: "FAULT".to_string(),
        };
        let mut trigger = SimulatedTrigger::new(cfg, Duration::from_secs(1));
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            trigger.next_event(&cancel).await;
            assert_eq!(trigger.take_response_override(), None);
        }
        trigger.next_event(&cancel).await;
        assert_eq!(trigger.take_response_override().as_deref(), Some("FAULT"));
        assert_eq!(trigger.take_response_override(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_probability_never_injects() {
        let mut cfg = config(0.0, 1.0, 100);
        cfg.critical.enabled = true;
        let mut trigger = SimulatedTrigger::new(cfg, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        for _ in 0..20 {
            trigger.next_event(&cancel).await;
            assert_eq!(trigger.take_response_override(), None);
        }
    }

    #[test]
    fn test_schedule_duration_saturates() {
        assert_eq!(schedule_duration(-1.0), Duration::ZERO);
        assert_eq!(schedule_duration(f64::NAN), Duration::ZERO);
        assert_eq!(schedule_duration(1e30), Duration::from_secs(u64::from(u32::MAX)));
        assert_eq!(schedule_duration(1.5), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_waits_until_cancelled() {
        let mut trigger = SimulatedTrigger::new(config(1e30, 1e30, 2), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                cancel.cancel();
            })
        };

        assert_eq!(trigger.next_event(&cancel).await, None);
        canceller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_ticks() {
        let mut trigger = SimulatedTrigger::new(config(60.0, 5.0, 2), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(3500)).await;
                cancel.cancel();
            })
        };

        assert_eq!(trigger.next_event(&cancel).await, None);
        assert_eq!(trigger.cycles_since_stop(), 0);
        canceller.await.unwrap();
    }
}
