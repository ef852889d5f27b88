//! Dynamic configuration registry
//!
//! Keeps the set of active equipment instances in step with a watched
//! directory. Descriptions are keyed by their `id`, never by file name. All
//! create/update/remove decisions go through one mutex which is never held
//! across an await.

use futures::future;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::controller::{ControllerContext, EquipmentController, InstanceHandle, InstanceSnapshot};
use super::error::RegistryError;
use super::loader::read_equipment;
use super::model::EquipmentConfig;
use super::report::CycleReport;
use super::watcher::{DirectoryWatcher, WatchEvent, WatcherSettings};

/// What a registration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryAction {
    /// New instance created and started
    Created,
    /// Description of a running instance replaced
    Updated,
    /// Same description as the running one
    Unchanged,
}

struct Entry {
    handle: InstanceHandle,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
    generation: u64,
}

#[derive(Default)]
struct RegistryState {
    instances: HashMap<String, Entry>,
    paths: HashMap<PathBuf, String>,
    next_generation: u64,
    shutting_down: bool,
}

impl RegistryState {
    fn path_refs(&self, id: &str) -> usize {
        self.paths.values().filter(|v| v.as_str() == id).count()
    }
}

struct RegistryInner {
    ctx: Arc<ControllerContext>,
    state: Mutex<RegistryState>,
    root: CancellationToken,
}

/// Registry of active equipment instances
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create an empty registry
    pub fn new(ctx: ControllerContext) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                ctx: Arc::new(ctx),
                state: Mutex::new(RegistryState::default()),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Receive a report after every completed cycle of any instance
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.inner.ctx.subscribe()
    }

    /// Register a description: start a new instance or update a running one
    pub fn upsert(&self, config: EquipmentConfig) -> Result<RegistryAction, RegistryError> {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return Err(RegistryError::ShuttingDown);
        }

        // An entry still draining after a removal is replaced by a fresh instance
        if let Some(entry) = state.instances.get(&config.id).filter(|e| !e.cancel.is_cancelled()) {
            if *entry.handle.config() == config {
                return Ok(RegistryAction::Unchanged);
            }
            tracing::info!(equipment = %config.id, "description updated");
            entry.handle.swap_config(config);
            return Ok(RegistryAction::Updated);
        }

        let id = config.id.clone();
        let controller = EquipmentController::new(config, self.inner.ctx.clone());
        let handle = controller.handle();
        let cancel = self.inner.root.child_token();
        let generation = state.next_generation;
        state.next_generation += 1;
        let join = controller.spawn(cancel.clone());

        tracing::info!(equipment = %id, generation, "instance registered");
        state.instances.insert(
            id,
            Entry {
                handle,
                cancel,
                join: Some(join),
                generation,
            },
        );
        Ok(RegistryAction::Created)
    }

    /// Load a description file and register it
    ///
    /// When the file used to carry another id, that instance is retired
    /// unless another file still declares it.
    pub async fn apply_document(&self, path: &Path) -> Result<RegistryAction, RegistryError> {
        let config = read_equipment(path).await?;
        let id = config.id.clone();
        let action = self.upsert(config)?;

        let previous = {
            let mut state = self.inner.state.lock();
            state.paths.insert(path.to_path_buf(), id.clone())
        };
        if let Some(old) = previous.filter(|old| *old != id) {
            tracing::info!(path = %path.display(), from = %old, to = %id, "file now declares another id");
            self.retire_if_orphaned(&old).await;
        }
        Ok(action)
    }

    /// Forget a file; its instance is removed when no other file declares it
    pub async fn remove_path(&self, path: &Path) -> Option<String> {
        let id = self.inner.state.lock().paths.remove(path)?;
        self.retire_if_orphaned(&id).await;
        Some(id)
    }

    async fn retire_if_orphaned(&self, id: &str) {
        let orphaned = self.inner.state.lock().path_refs(id) == 0;
        if orphaned {
            self.remove(id).await;
        }
    }

    /// Cancel an instance and wait for its loop to finish
    ///
    /// Returns false for an unknown id.
    pub async fn remove(&self, id: &str) -> bool {
        let (join, generation) = {
            let mut state = self.inner.state.lock();
            let Some(entry) = state.instances.get_mut(id) else {
                return false;
            };
            entry.cancel.cancel();
            (entry.join.take(), entry.generation)
        };
        tracing::info!(equipment = %id, "removing instance");

        if let Some(join) = join {
            if let Err(err) = join.await {
                tracing::error!(equipment = %id, error = %err, "control loop panicked");
            }
        }

        let mut state = self.inner.state.lock();
        if state.instances.get(id).is_some_and(|e| e.generation == generation) {
            state.instances.remove(id);
            tracing::info!(equipment = %id, "instance removed");
        }
        true
    }

    /// Whether an instance with this id is registered
    pub fn contains(&self, id: &str) -> bool {
        self.inner.state.lock().instances.contains_key(id)
    }

    /// Handle of a registered instance
    pub fn handle(&self, id: &str) -> Option<InstanceHandle> {
        self.inner.state.lock().instances.get(id).map(|e| e.handle.clone())
    }

    /// Number of registered instances
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().instances.len()
    }

    /// Per-instance view, sorted by id
    pub fn snapshot(&self) -> Vec<InstanceSnapshot> {
        let handles: Vec<InstanceHandle> = self
            .inner
            .state
            .lock()
            .instances
            .values()
            .map(|e| e.handle.clone())
            .collect();
        let mut snapshots: Vec<_> = handles.iter().map(InstanceHandle::snapshot).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Stop accepting descriptions, cancel every instance and wait for all
    pub async fn shutdown(&self) {
        let joins: Vec<(String, JoinHandle<()>)> = {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            self.inner.root.cancel();
            state
                .instances
                .iter_mut()
                .filter_map(|(id, e)| e.join.take().map(|j| (id.clone(), j)))
                .collect()
        };
        tracing::info!(instances = joins.len(), "shutting down");

        let (ids, joins): (Vec<_>, Vec<_>) = joins.into_iter().unzip();
        for (id, outcome) in ids.iter().zip(future::join_all(joins).await) {
            if let Err(err) = outcome {
                tracing::error!(equipment = %id, error = %err, "control loop panicked");
            }
        }
        self.inner.state.lock().instances.clear();
    }

    async fn handle_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Changed(path) => match self.apply_document(&path).await {
                Ok(action) => {
                    tracing::debug!(path = %path.display(), ?action, "description applied");
                }
                Err(RegistryError::Configuration(err)) => {
                    tracing::warn!(
                        path = %path.display(),
                        id = err.id.as_deref().unwrap_or("?"),
                        reason = %err.reason,
                        "description rejected, previous state kept"
                    );
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "description not applied");
                }
            },
            WatchEvent::Removed(path) => {
                if let Some(id) = self.remove_path(&path).await {
                    tracing::info!(path = %path.display(), equipment = %id, "description deleted");
                }
            }
        }
    }

    /// Watch a directory until `cancel` fires
    ///
    /// Events are handled one at a time, in the order they settle.
    pub async fn watch(
        &self,
        dir: &Path,
        settings: WatcherSettings,
        cancel: CancellationToken,
    ) -> Result<(), RegistryError> {
        let meta = tokio::fs::metadata(dir).await.map_err(|source| RegistryError::Watch {
            path: dir.to_path_buf(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(RegistryError::Watch {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        tracing::info!(dir = %dir.display(), poll_ms = settings.poll_interval.as_millis(), "watching");
        let mut watcher = DirectoryWatcher::new(dir, settings);
        let mut ticker = tokio::time::interval(settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match watcher.poll().await {
                Ok(events) => {
                    for event in events {
                        self.handle_event(event).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "scan failed, retrying");
                }
            }
        }
        Ok(())
    }

    /// Spawn [`Registry::watch`] as its own task
    pub fn spawn_watch(
        &self,
        dir: PathBuf,
        settings: WatcherSettings,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<(), RegistryError>> {
        let registry = self.clone();
        tokio::spawn(async move { registry.watch(&dir, settings, cancel).await })
    }
}
