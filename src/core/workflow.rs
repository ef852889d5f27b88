//! Workflow executor
//!
//! Runs one port through Start, Test and Stop. The port is reserved and its
//! session opened at the first command and both are held until the run ends.
//! Cancellation is honoured at phase boundaries only: a cancelled run skips
//! straight to Stop.

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::WorkflowError;
use super::hardware::HardwareSignalProvider;
use super::model::{Command, CriticalCondition, Phase, PortConfig};
use super::report::{CommandResult, PhaseResult, WorkflowResult};
use super::reservation::{PortReservation, PortReservationTable};
use super::resolver::ResolvedPort;
use super::transport::TransportSession;
use super::validation::{classify_command, ValidationLevel, ValidationResult};

/// Default name of the critical-fail output line
pub const DEFAULT_CRITICAL_OUTPUT: &str = "CRITICAL_FAIL";

/// Default hold of the critical-fail output
pub const DEFAULT_CRITICAL_HOLD: Duration = Duration::from_secs(2);

/// One port to run
#[derive(Debug, Clone, Copy)]
pub struct PortJob<'a> {
    /// Equipment id
    pub equipment_id: &'a str,
    /// Unit id
    pub unit_id: &'a str,
    /// Port description
    pub port: &'a PortConfig,
    /// Where the port's sessions go
    pub resolved: &'a ResolvedPort,
    /// Equipment-wide critical conditions
    pub critical_conditions: &'a [CriticalCondition],
}

impl PortJob<'_> {
    fn holder(&self) -> String {
        format!("{}/{}/{}", self.equipment_id, self.unit_id, self.port.number)
    }
}

struct OpenSession {
    session: Box<dyn TransportSession>,
    _reservation: PortReservation,
}

/// Outcome of getting a session for the next command
enum Acquired {
    Ready,
    Busy(String),
}

/// Per-run mutable state
struct Run<'a> {
    job: PortJob<'a>,
    session: Option<OpenSession>,
    phases: Vec<PhaseResult>,
    signal_error: Option<String>,
}

/// Executes port workflows
///
/// Cheap to clone; every clone shares the reservation table and the signal
/// provider.
#[derive(Clone)]
pub struct WorkflowExecutor {
    reservations: PortReservationTable,
    signals: Arc<dyn HardwareSignalProvider>,
    critical_output: String,
    critical_hold: Duration,
}

impl WorkflowExecutor {
    /// Create an executor with the default critical output
    pub fn new(reservations: PortReservationTable, signals: Arc<dyn HardwareSignalProvider>) -> Self {
        Self {
            reservations,
            signals,
            critical_output: DEFAULT_CRITICAL_OUTPUT.to_string(),
            critical_hold: DEFAULT_CRITICAL_HOLD,
        }
    }

    /// Use another critical-fail output line and hold
    #[must_use]
    pub fn with_critical_output(mut self, name: &str, hold: Duration) -> Self {
        self.critical_output = name.to_string();
        self.critical_hold = hold;
        self
    }

    /// Shared reservation table
    pub fn reservations(&self) -> &PortReservationTable {
        &self.reservations
    }

    /// Run Start, Test and Stop on one port
    ///
    /// `injected` replaces the response of the first Test command that runs
    /// and is consumed when used.
    pub async fn run(
        &self,
        job: PortJob<'_>,
        injected: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult, WorkflowError> {
        let started = Instant::now();
        let started_at = Local::now();
        let mut run = Run {
            job,
            session: None,
            phases: Vec::new(),
            signal_error: None,
        };

        let mut cancelled = cancel.is_cancelled();
        if !cancelled {
            let start_ok = self.run_phase(&mut run, Phase::Start, &mut None).await?;
            cancelled = cancel.is_cancelled();
            if start_ok && !cancelled {
                self.run_phase(&mut run, Phase::Test, injected).await?;
                cancelled = cancel.is_cancelled();
            }
        }
        if cancelled {
            tracing::info!(port = %run.job.holder(), "cancelled, skipping to Stop");
        }

        self.run_stop(&mut run).await;
        Ok(self.finish(run, started, started_at, cancelled).await)
    }

    /// Run only the Stop phase of a port
    pub async fn run_stop_only(&self, job: PortJob<'_>) -> WorkflowResult {
        let started = Instant::now();
        let started_at = Local::now();
        let mut run = Run {
            job,
            session: None,
            phases: Vec::new(),
            signal_error: None,
        };
        self.run_stop(&mut run).await;
        self.finish(run, started, started_at, true).await
    }

    async fn run_stop(&self, run: &mut Run<'_>) {
        // Stop is best-effort; an open failure is only logged.
        if let Err(err) = self.run_phase(run, Phase::Stop, &mut None).await {
            tracing::warn!(port = %run.job.holder(), error = %err, "Stop phase could not run");
            if let Some(stop) = run.phases.last_mut() {
                stop.aborted = true;
            }
        }
    }

    async fn finish(
        &self,
        mut run: Run<'_>,
        started: Instant,
        started_at: chrono::DateTime<Local>,
        cancelled: bool,
    ) -> WorkflowResult {
        if let Some(mut open) = run.session.take() {
            if let Err(err) = open.session.close().await {
                tracing::debug!(port = %run.job.holder(), error = %err, "close failed");
            }
        }

        let highest_level = run
            .phases
            .iter()
            .map(PhaseResult::highest_level)
            .max()
            .unwrap_or_default();
        let success = run
            .phases
            .iter()
            .filter(|p| p.phase != Phase::Stop)
            .all(|p| !p.highest_level().is_failure());
        let captures = run
            .phases
            .iter()
            .flat_map(|p| &p.commands)
            .find(|c| c.validation.level() == highest_level)
            .map(|c| c.validation.captures().clone())
            .unwrap_or_default();

        WorkflowResult {
            equipment_id: run.job.equipment_id.to_string(),
            unit_id: run.job.unit_id.to_string(),
            port: run.job.port.number,
            target: run.job.resolved.target.identity(),
            phases: run.phases,
            highest_level,
            success,
            cancelled,
            duration_ms: elapsed_ms(started),
            captures,
            signal_error: run.signal_error,
            started_at,
        }
    }

    /// Returns whether the phase ran to completion without an abort
    async fn run_phase(
        &self,
        run: &mut Run<'_>,
        phase: Phase,
        injected: &mut Option<String>,
    ) -> Result<bool, WorkflowError> {
        let job = run.job;
        let mut result = PhaseResult::new(phase);
        let commands = job.port.commands(phase);
        let holder = job.holder();
        tracing::debug!(port = %holder, %phase, commands = commands.len(), "phase started");

        for (index, command) in commands.iter().enumerate() {
            let started = Instant::now();
            let validation = match self.execute(run, phase, command, injected).await {
                Ok(validation) => validation,
                Err(err) => {
                    run.phases.push(result);
                    return Err(err);
                }
            };
            self.report_level(run, phase, command, &validation).await;

            let keep_going = match (phase, validation.level()) {
                (Phase::Stop, _) => true,
                (_, ValidationLevel::Critical) => false,
                _ => validation.should_continue_workflow(),
            };
            result.commands.push(CommandResult {
                command: command.command.clone(),
                validation,
                elapsed_ms: elapsed_ms(started),
            });

            if !keep_going {
                result.aborted = index + 1 < commands.len() || phase == Phase::Start;
                tracing::info!(port = %holder, %phase, command = %command.command, "phase aborted");
                run.phases.push(result);
                return Ok(false);
            }
        }

        run.phases.push(result);
        Ok(true)
    }

    async fn acquire(&self, run: &mut Run<'_>) -> Result<Acquired, WorkflowError> {
        if run.session.is_some() {
            return Ok(Acquired::Ready);
        }

        let target = &run.job.resolved.target;
        let identity = target.identity();
        let reservation = match self.reservations.try_reserve(&identity, &run.job.holder()) {
            Ok(reservation) => reservation,
            Err(conflict) => {
                tracing::warn!(port = %identity, holder = %conflict.holder, "port busy");
                return Ok(Acquired::Busy(conflict.to_string()));
            }
        };

        let session = run
            .job
            .resolved
            .transport
            .open(target, &run.job.port.framing())
            .await
            .map_err(|source| WorkflowError::Open {
                port: identity.clone(),
                source,
            })?;
        tracing::debug!(port = %identity, framing = %run.job.port.framing(), "session opened");

        run.session = Some(OpenSession {
            session,
            _reservation: reservation,
        });
        Ok(Acquired::Ready)
    }

    async fn execute(
        &self,
        run: &mut Run<'_>,
        phase: Phase,
        command: &Command,
        injected: &mut Option<String>,
    ) -> Result<ValidationResult, WorkflowError> {
        if let Acquired::Busy(reason) = self.acquire(run).await? {
            return Ok(ValidationResult::command_failure(reason, command.continue_on_failure));
        }
        let Some(open) = run.session.as_mut() else {
            return Ok(ValidationResult::command_failure("no session", command.continue_on_failure));
        };

        let line = format!("{}{}", command.command, run.job.port.line_ending);
        if let Err(err) = open.session.send(line.as_bytes()).await {
            return Ok(ValidationResult::command_failure(
                format!("send failed: {err}"),
                command.continue_on_failure,
            ));
        }

        let received = open.session.receive_until(command.timeout_duration()).await;

        let override_text = if phase == Phase::Test { injected.take() } else { None };
        if let Some(text) = override_text {
            tracing::info!(port = %run.job.holder(), response = %text, "response overridden by critical injection");
            return Ok(classify_command(&text, command, run.job.critical_conditions));
        }

        Ok(match received {
            Ok(bytes) => classify_command(&String::from_utf8_lossy(&bytes), command, run.job.critical_conditions),
            Err(err) => ValidationResult::command_failure(err.to_string(), command.continue_on_failure),
        })
    }

    async fn report_level(&self, run: &mut Run<'_>, phase: Phase, command: &Command, validation: &ValidationResult) {
        let port = run.job.holder();
        match validation.level() {
            ValidationLevel::Pass => {
                tracing::debug!(%port, %phase, command = %command.command, "PASS");
            }
            ValidationLevel::Warn => {
                tracing::info!(%port, %phase, command = %command.command, message = validation.message(), "WARN");
            }
            ValidationLevel::Fail => {
                tracing::warn!(
                    %port,
                    %phase,
                    command = %command.command,
                    response = validation.response(),
                    message = validation.message(),
                    "FAIL"
                );
            }
            ValidationLevel::Critical => {
                tracing::error!(
                    %port,
                    %phase,
                    command = %command.command,
                    response = validation.response(),
                    message = validation.message(),
                    "CRITICAL"
                );
            }
        }

        if validation.should_trigger_hardware_signal() {
            if let Err(err) = self
                .signals
                .set_output(&self.critical_output, true, self.critical_hold)
                .await
            {
                tracing::warn!(%port, output = %self.critical_output, error = %err, "critical output not asserted");
                run.signal_error = Some(err.to_string());
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
