//! Equipment instance controller
//!
//! One control loop per equipment: wait for a trigger event, run every port
//! of every unit on Start, go idle on Stop. Exactly one cycle is in flight
//! per instance. Configuration swaps take effect at the next cycle boundary.

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::hardware::HardwareSignalProvider;
use super::model::EquipmentConfig;
use super::report::{AggregatedResult, CycleReport, PortError, UnitResult};
use super::resolver::PortResolver;
use super::state_machine::{InstanceStateMachine, InstanceStatus, StateTransition};
use super::trigger::{TriggerBasis, TriggerEvent, TriggerSettings, TriggerSource};
use super::workflow::{PortJob, WorkflowExecutor};

/// Capacity of the cycle report channel
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Collaborators shared by every instance
pub struct ControllerContext {
    /// Runs port workflows
    pub executor: WorkflowExecutor,
    /// Maps ports to transports
    pub resolver: Arc<dyn PortResolver>,
    /// Bench I/O for hardware triggers
    pub signals: Arc<dyn HardwareSignalProvider>,
    /// Trigger defaults
    pub triggers: TriggerSettings,
    reports: broadcast::Sender<CycleReport>,
}

impl ControllerContext {
    /// Create a context with its own report channel
    pub fn new(
        executor: WorkflowExecutor,
        resolver: Arc<dyn PortResolver>,
        signals: Arc<dyn HardwareSignalProvider>,
        triggers: TriggerSettings,
    ) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            executor,
            resolver,
            signals,
            triggers,
            reports,
        }
    }

    /// Receive a report after every completed cycle
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.reports.subscribe()
    }
}

/// Point-in-time view of an instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    /// Equipment id
    pub id: String,
    /// Lifecycle status
    pub status: InstanceStatus,
    /// Time spent in `status` so far, in milliseconds
    pub in_status_ms: u64,
    /// Completed cycles
    pub cycles: u64,
    /// Last trigger event or cycle completion
    pub last_activity: Option<DateTime<Local>>,
    /// Trigger variant
    pub trigger: String,
    /// Number of ports in the active description
    pub ports: usize,
}

struct InstanceShared {
    id: String,
    config: RwLock<Arc<EquipmentConfig>>,
    state: Mutex<InstanceStateMachine>,
    cycles: AtomicU64,
    last_activity: Mutex<Option<DateTime<Local>>>,
    trigger_kind: Mutex<&'static str>,
}

/// Shared view of a running instance
#[derive(Clone)]
pub struct InstanceHandle {
    shared: Arc<InstanceShared>,
}

impl InstanceHandle {
    /// Equipment id
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Active description
    pub fn config(&self) -> Arc<EquipmentConfig> {
        self.shared.config.read().clone()
    }

    /// Replace the description; an in-flight cycle keeps the old one
    pub fn swap_config(&self, config: EquipmentConfig) {
        *self.shared.config.write() = Arc::new(config);
    }

    /// Current status
    pub fn status(&self) -> InstanceStatus {
        self.shared.state.lock().state()
    }

    /// Completed cycles
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    /// Last trigger event or cycle completion
    pub fn last_activity(&self) -> Option<DateTime<Local>> {
        *self.shared.last_activity.lock()
    }

    /// Status transitions so far, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.shared.state.lock().history().cloned().collect()
    }

    /// Point-in-time view
    pub fn snapshot(&self) -> InstanceSnapshot {
        let (status, in_status) = {
            let state = self.shared.state.lock();
            (state.state(), state.time_in_state())
        };
        InstanceSnapshot {
            id: self.shared.id.clone(),
            status,
            in_status_ms: u64::try_from(in_status.as_millis()).unwrap_or(u64::MAX),
            cycles: self.cycles(),
            last_activity: self.last_activity(),
            trigger: (*self.shared.trigger_kind.lock()).to_string(),
            ports: self.config().port_count(),
        }
    }

    fn set_status(&self, status: InstanceStatus, reason: &str) {
        if let Err(err) = self.shared.state.lock().transition(status, Some(reason)) {
            tracing::debug!(equipment = %self.shared.id, error = %err, "status unchanged");
        }
    }

    fn touch(&self) {
        *self.shared.last_activity.lock() = Some(Local::now());
    }
}

/// Run every port of every unit once
///
/// A port whose session cannot be opened is recorded as an error and the
/// cycle moves on. With `cancel` fired, remaining ports only run Stop.
pub async fn run_cycle(
    ctx: &ControllerContext,
    config: &EquipmentConfig,
    injected: &mut Option<String>,
    cancel: &CancellationToken,
) -> AggregatedResult {
    let started = Instant::now();
    let mut units = Vec::with_capacity(config.units.len());

    for unit in &config.units {
        let mut unit_result = UnitResult::new(&unit.id);
        for port in &unit.ports {
            let resolved = ctx.resolver.resolve(&format!("{}/{}", config.id, unit.id), port);
            let job = PortJob {
                equipment_id: &config.id,
                unit_id: &unit.id,
                port,
                resolved: &resolved,
                critical_conditions: &config.critical_conditions,
            };
            match ctx.executor.run(job, injected, cancel).await {
                Ok(result) => unit_result.ports.push(result),
                Err(err) => {
                    tracing::error!(equipment = %config.id, unit = %unit.id, port = port.number, error = %err, "port run failed");
                    unit_result.errors.push(PortError {
                        port: port.number,
                        reason: err.to_string(),
                    });
                }
            }
        }
        units.push(unit_result);
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    AggregatedResult::from_units(&config.id, units, duration_ms)
}

/// Run only the Stop phase of every port
pub async fn run_stop_pass(ctx: &ControllerContext, config: &EquipmentConfig) {
    for unit in &config.units {
        for port in &unit.ports {
            let resolved = ctx.resolver.resolve(&format!("{}/{}", config.id, unit.id), port);
            let job = PortJob {
                equipment_id: &config.id,
                unit_id: &unit.id,
                port,
                resolved: &resolved,
                critical_conditions: &config.critical_conditions,
            };
            let result = ctx.executor.run_stop_only(job).await;
            tracing::debug!(port = %result.label(), level = %result.highest_level, "stop pass");
        }
    }
}

/// Control loop of one equipment instance
pub struct EquipmentController {
    handle: InstanceHandle,
    ctx: Arc<ControllerContext>,
}

impl EquipmentController {
    /// Create a controller in `Idle`
    pub fn new(config: EquipmentConfig, ctx: Arc<ControllerContext>) -> Self {
        let handle = InstanceHandle {
            shared: Arc::new(InstanceShared {
                id: config.id.clone(),
                config: RwLock::new(Arc::new(config)),
                state: Mutex::new(InstanceStateMachine::new()),
                cycles: AtomicU64::new(0),
                last_activity: Mutex::new(None),
                trigger_kind: Mutex::new("none"),
            }),
        };
        Self { handle, ctx }
    }

    /// Shared view of this instance
    pub fn handle(&self) -> InstanceHandle {
        self.handle.clone()
    }

    /// Spawn the control loop
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    fn build_trigger(&self, config: &EquipmentConfig) -> TriggerSource {
        let trigger = TriggerSource::for_equipment(config, &self.ctx.triggers, self.ctx.signals.clone());
        *self.handle.shared.trigger_kind.lock() = trigger.kind();
        tracing::debug!(equipment = %config.id, trigger = trigger.kind(), "trigger source ready");
        trigger
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let handle = self.handle.clone();
        let id = handle.id().to_string();
        handle.set_status(InstanceStatus::Starting, "control loop started");
        tracing::info!(equipment = %id, "instance started");

        let config = handle.config();
        let mut basis = TriggerBasis::of(&config);
        let mut trigger = self.build_trigger(&config);
        let mut stop_done = false;

        loop {
            let config = handle.config();
            let next_basis = TriggerBasis::of(&config);
            if next_basis != basis {
                tracing::info!(equipment = %id, "trigger settings changed, rebuilding trigger source");
                trigger = self.build_trigger(&config);
                basis = next_basis;
            }

            let Some(event) = trigger.next_event(&cancel).await else {
                break;
            };
            handle.touch();
            tracing::debug!(equipment = %id, %event, "trigger event");

            match event {
                TriggerEvent::Start => {
                    handle.set_status(InstanceStatus::Running, "trigger Start");
                    let config = handle.config();
                    let mut injected = trigger.take_response_override();
                    let result = run_cycle(&self.ctx, &config, &mut injected, &cancel).await;
                    handle.touch();

                    if result.cancelled {
                        stop_done = true;
                        tracing::info!(equipment = %id, "cycle interrupted by cancellation");
                        break;
                    }

                    let cycle = handle.shared.cycles.fetch_add(1, Ordering::SeqCst) + 1;
                    let errored = result.units.iter().any(|u| !u.errors.is_empty());
                    if errored {
                        handle.set_status(InstanceStatus::Error, "port session could not be opened");
                    }
                    tracing::info!(
                        equipment = %id,
                        cycle,
                        level = %result.highest_level,
                        success = result.success,
                        duration_ms = result.duration_ms,
                        "cycle completed"
                    );
                    // No subscribers is fine
                    let _ = self.ctx.reports.send(CycleReport {
                        equipment_id: id.clone(),
                        cycle,
                        result,
                    });
                }
                TriggerEvent::Stop => {
                    handle.set_status(InstanceStatus::Idle, "trigger Stop");
                    tracing::info!(equipment = %id, cycles = handle.cycles(), "test session stopped");
                }
            }
        }

        let was_active = handle.status().is_active();
        handle.set_status(InstanceStatus::Stopping, "cancelled");
        if was_active && !stop_done {
            run_stop_pass(&self.ctx, &handle.config()).await;
        }
        handle.set_status(InstanceStatus::Removed, "control loop finished");
        tracing::info!(equipment = %id, cycles = handle.cycles(), "instance stopped");
    }
}
