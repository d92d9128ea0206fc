//! Session runtime.

use crate::config::Config;
use crate::error::RuntimeError;
use crate::invoker::ChartInvoker;
use crate::loader::load_chart;
use crate::queue;
use crate::registry::{ParentLink, SessionRegistry};
use crate::session::{Checkpointing, Session, SessionHandle, Start};
use crate::timer::TimerQueue;
use dashmap::DashMap;
use parking_lot::Mutex;
use rstchart_core::model::Chart;
use rstchart_core::{
    Collaborators, Cursor, DataModelFactory, DataModelRegistry, Event, Interpreter, LogSink,
    TracingLogSink,
};
use rstchart_storage::{CheckpointPolicy, CheckpointStore, FileCheckpointStore};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Options for starting a session.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Session id; generated when absent.
    pub session_id: Option<String>,
    /// Values that replace the chart's declared data.
    pub initial_data: Map<String, Value>,
}

impl SpawnOptions {
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_data(mut self, name: impl Into<String>, value: Value) -> Self {
        self.initial_data.insert(name.into(), value);
        self
    }
}

pub(crate) struct RuntimeInner {
    config: Config,
    registry: Arc<SessionRegistry>,
    timers: Arc<TimerQueue>,
    timer_task: Mutex<Option<JoinHandle<()>>>,
    catalog: DashMap<String, Arc<Chart>>,
    datamodels: DataModelRegistry,
    log: Arc<dyn LogSink>,
    store: Option<Arc<dyn CheckpointStore>>,
    invoker: Arc<ChartInvoker>,
    root: CancellationToken,
}

impl RuntimeInner {
    pub(crate) fn chart(&self, name: &str) -> Option<Arc<Chart>> {
        self.catalog.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Cancellation token for a new child of `parent_session`.
    pub(crate) fn child_token(&self, parent_session: &str) -> CancellationToken {
        self.registry
            .cancel_token(parent_session)
            .unwrap_or_else(|| self.root.clone())
            .child_token()
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.registry.clone(),
            self.timers.clone(),
            self.invoker.clone(),
        )
        .with_log(Arc::clone(&self.log))
    }

    fn checkpointing(&self) -> Option<Checkpointing> {
        let store = self.store.as_ref()?;
        if self.config.checkpoint.policy == CheckpointPolicy::Never {
            return None;
        }
        Some(Checkpointing {
            store: Arc::clone(store),
            policy: self.config.checkpoint.policy,
        })
    }

    pub(crate) fn start_session(
        &self,
        chart: Arc<Chart>,
        options: SpawnOptions,
        parent: Option<ParentLink>,
        cancel: CancellationToken,
        start: Start,
        checkpoint: bool,
    ) -> Result<SessionHandle, RuntimeError> {
        if self.root.is_cancelled() {
            return Err(RuntimeError::ShuttingDown);
        }

        let session_id = options
            .session_id
            .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));
        let kind = if chart.datamodel().is_empty() {
            self.config.session.datamodel.as_str()
        } else {
            chart.datamodel()
        };
        let datamodel = self.datamodels.create(kind)?;

        let (tx, rx) = queue::channel(self.config.session.queue_capacity);
        let registration =
            self.registry
                .register(&session_id, tx.downgrade(), cancel.clone(), parent)?;

        let interp = Interpreter::new(chart, session_id.clone(), datamodel, self.collaborators())
            .with_initial_data(options.initial_data);
        let checkpointing = if checkpoint {
            self.checkpointing()
        } else {
            None
        };

        let session = Session::new(
            interp,
            rx,
            cancel.clone(),
            registration,
            self.timers.clone(),
            checkpointing,
        );
        let task = tokio::spawn(session.run(start));

        Ok(SessionHandle::new(session_id, tx, cancel, task))
    }
}

/// Builds a [`Runtime`].
pub struct RuntimeBuilder {
    config: Config,
    log: Option<Arc<dyn LogSink>>,
    store: Option<Arc<dyn CheckpointStore>>,
    datamodels: DataModelRegistry,
}

impl RuntimeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            log: None,
            store: None,
            datamodels: DataModelRegistry::default(),
        }
    }

    /// Where `<log>` output goes. Defaults to `tracing`.
    pub fn log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = Some(log);
        self
    }

    /// Uses this store instead of the one configured under `checkpoint`.
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registers an additional data model back-end.
    pub fn datamodel(self, kind: impl Into<String>, factory: Arc<dyn DataModelFactory>) -> Self {
        self.datamodels.register(kind, factory);
        self
    }

    /// Builds the runtime and starts its timer driver. Must be called from
    /// within a tokio runtime.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let store = match self.store {
            Some(store) => Some(store),
            None if self.config.checkpoint.enabled => {
                let store = FileCheckpointStore::open(&self.config.checkpoint.dir)?;
                Some(Arc::new(store) as Arc<dyn CheckpointStore>)
            }
            None => None,
        };

        let registry = Arc::new(SessionRegistry::new());
        let timers = TimerQueue::new(Arc::clone(&registry));
        let timer_task = timers.start();
        let grace = self.config.invoke.cancel_grace();

        tracing::info!(
            "Runtime started (queue_capacity={}, checkpoints={}, policy={})",
            self.config.session.queue_capacity,
            store.is_some(),
            self.config.checkpoint.policy
        );

        let inner = Arc::new_cyclic(|weak| RuntimeInner {
            config: self.config,
            registry,
            timers,
            timer_task: Mutex::new(Some(timer_task)),
            catalog: DashMap::new(),
            datamodels: self.datamodels,
            log: self.log.unwrap_or_else(|| Arc::new(TracingLogSink)),
            store,
            invoker: Arc::new(ChartInvoker::new(weak.clone(), grace)),
            root: CancellationToken::new(),
        });

        Ok(Runtime { inner })
    }
}

/// Hosts sessions: owns the transport, the timer queue, the chart catalog and
/// the checkpoint store they share.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Creates a runtime with default data models and `tracing` log output.
    pub fn new(config: Config) -> Result<Self, RuntimeError> {
        RuntimeBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn checkpoint_store(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.inner.store.as_ref()
    }

    /// Adds a chart to the catalog under its name. Invokes can then name it
    /// in `src`.
    pub fn register_chart(&self, chart: Chart) -> Arc<Chart> {
        let chart = Arc::new(chart);
        self.inner
            .catalog
            .insert(chart.name().to_string(), Arc::clone(&chart));
        chart
    }

    /// Loads a chart file and registers it.
    pub fn register_chart_file(&self, path: impl AsRef<Path>) -> Result<Arc<Chart>, RuntimeError> {
        Ok(self.register_chart(load_chart(path)?))
    }

    pub fn chart(&self, name: &str) -> Option<Arc<Chart>> {
        self.inner.chart(name)
    }

    /// Names of all registered charts, sorted.
    pub fn charts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.catalog.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn catalog_chart(&self, name: &str) -> Result<Arc<Chart>, RuntimeError> {
        self.chart(name)
            .ok_or_else(|| RuntimeError::UnknownChart(name.to_string()))
    }

    /// Starts a session of a registered chart.
    pub fn spawn(&self, chart: &str) -> Result<SessionHandle, RuntimeError> {
        self.spawn_with(chart, SpawnOptions::default())
    }

    pub fn spawn_with(
        &self,
        chart: &str,
        options: SpawnOptions,
    ) -> Result<SessionHandle, RuntimeError> {
        let chart = self.catalog_chart(chart)?;
        self.spawn_chart(chart, options)
    }

    /// Starts a session of a chart that need not be in the catalog.
    pub fn spawn_chart(
        &self,
        chart: Arc<Chart>,
        options: SpawnOptions,
    ) -> Result<SessionHandle, RuntimeError> {
        self.inner.start_session(
            chart,
            options,
            None,
            self.inner.root.child_token(),
            Start::Fresh,
            true,
        )
    }

    /// Resumes a session from a cursor. The session keeps the cursor's id.
    pub fn resume(&self, chart: &str, cursor: Cursor) -> Result<SessionHandle, RuntimeError> {
        let chart = self.catalog_chart(chart)?;
        let options = SpawnOptions::default().with_session_id(cursor.session_id.clone());
        self.inner.start_session(
            chart,
            options,
            None,
            self.inner.root.child_token(),
            Start::Restore(Box::new(cursor)),
            true,
        )
    }

    /// Resumes a session from its latest checkpoint, if it has one.
    pub fn resume_latest(
        &self,
        chart: &str,
        session_id: &str,
    ) -> Result<Option<SessionHandle>, RuntimeError> {
        let Some(store) = &self.inner.store else {
            return Ok(None);
        };
        match store.latest(session_id)? {
            Some(cursor) => self.resume(chart, cursor).map(Some),
            None => Ok(None),
        }
    }

    /// Ids of all live sessions, including invoked ones.
    pub fn sessions(&self) -> Vec<String> {
        self.inner.registry.session_ids()
    }

    /// Puts an external event on a live session's queue.
    pub fn send(&self, session_id: &str, event: Event) -> Result<(), RuntimeError> {
        if !self.inner.registry.contains(session_id) {
            return Err(RuntimeError::SessionNotFound(session_id.to_string()));
        }
        self.inner
            .registry
            .deliver(session_id, event)
            .map_err(|e| match e {
                rstchart_core::DispatchError::QueueFull { .. } => {
                    RuntimeError::QueueFull(session_id.to_string())
                }
                rstchart_core::DispatchError::Unreachable { .. } => {
                    RuntimeError::SessionNotFound(session_id.to_string())
                }
                _ => RuntimeError::QueueClosed(session_id.to_string()),
            })
    }

    /// Requests cancellation of a live session.
    pub fn cancel(&self, session_id: &str) -> bool {
        self.inner.registry.cancel(session_id)
    }

    /// Cancels every session and stops the timer driver.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down runtime (sessions={})", self.inner.registry.len());
        self.inner.root.cancel();
        self.inner.timers.shutdown();
        let task = self.inner.timer_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests;
