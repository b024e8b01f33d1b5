use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::config::EngineSettings;
use crate::domain::{now_ms, ExecutionEvent, TestExecution, TestExecutionLog, TestReport};
use crate::engine::cancel::CancelRegistry;
use crate::engine::case_runner::CasePolicy;
use crate::engine::http::{HttpTransport, Transport};
use crate::engine::monitor::{self, Alert, AlertMonitor, ExecutionStatistics};
use crate::engine::orchestrator::Orchestrator;
use crate::engine::report::build_report;
use crate::error::{Error, Result};
use crate::repository::ConfigRepository;
use crate::store::{EventStream, ExecutionStore, ReportStore, SqliteReportStore};

static EXECUTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn generate_id(prefix: &str) -> String {
    let counter = EXECUTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{counter}", now_ms())
}

/// Entry point for starting, observing and stopping suite runs.
pub struct ExecutionService {
    orchestrator: Arc<Orchestrator>,
    store: Arc<ExecutionStore>,
    reports: Arc<dyn ReportStore>,
    cancels: Arc<CancelRegistry>,
    alerts: AlertMonitor,
    retention: Duration,
}

impl ExecutionService {
    pub fn new(
        repository: Arc<dyn ConfigRepository>,
        transport: Arc<dyn Transport>,
        reports: Arc<dyn ReportStore>,
        settings: &EngineSettings,
    ) -> Self {
        let store = Arc::new(ExecutionStore::new());
        let orchestrator = Orchestrator::new(
            repository,
            transport,
            store.clone(),
            reports.clone(),
            CasePolicy::from(settings),
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            reports,
            cancels: Arc::new(CancelRegistry::new()),
            alerts: AlertMonitor::new(),
            retention: settings.retention(),
        }
    }

    /// Wire the HTTP transport and the report database described by `settings`.
    pub fn from_settings(
        repository: Arc<dyn ConfigRepository>,
        settings: &EngineSettings,
    ) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&settings.transport)?);
        let reports: Arc<dyn ReportStore> = match &settings.database_path {
            Some(path) => Arc::new(SqliteReportStore::open(path)?),
            None => Arc::new(SqliteReportStore::open_in_memory()?),
        };
        Ok(Self::new(repository, transport, reports, settings))
    }

    /// Queue a run and return its pending snapshot. The run proceeds on a
    /// spawned task; callers poll or subscribe for progress.
    pub fn execute(&self, suite_id: &str, environment_id: &str) -> Result<TestExecution> {
        self.evict_expired();

        let execution_id = generate_id("exec");
        let execution = TestExecution::pending(
            execution_id.clone(),
            suite_id.to_string(),
            environment_id.to_string(),
            now_ms(),
        );
        self.store.create(execution.clone());
        let signal = self.cancels.register(&execution_id);
        tracing::info!(execution_id = %execution_id, suite_id, environment_id, "execution queued");

        let orchestrator = self.orchestrator.clone();
        let cancels = self.cancels.clone();
        tokio::spawn(async move {
            orchestrator.run(&execution_id, signal).await;
            cancels.remove(&execution_id);
        });

        Ok(execution)
    }

    pub fn get_execution(&self, id: &str) -> Result<TestExecution> {
        self.store.snapshot(id)
    }

    pub fn get_logs(&self, id: &str) -> Result<Vec<TestExecutionLog>> {
        self.store.logs(id)
    }

    /// Live events of a run: every log emitted from now on, then one
    /// `Finished` event, then the stream ends.
    pub fn stream_logs(&self, id: &str) -> Result<EventStream<ExecutionEvent>> {
        self.store.subscribe(id)
    }

    /// Ask a run to stop once its in-flight case completes.
    pub fn stop(&self, id: &str) -> Result<TestExecution> {
        let snapshot = self.store.request_cancel(id)?;
        if !snapshot.status.is_terminal() {
            self.cancels.cancel(id);
            tracing::info!(execution_id = id, "stop requested");
        }
        Ok(snapshot)
    }

    /// Report of a finished run. Stored reports are returned as they are;
    /// otherwise one is built from the recorded results and stored.
    pub fn generate_report(&self, execution_id: &str) -> Result<TestReport> {
        if let Some(report) = self.reports.load(execution_id)? {
            return Ok(report);
        }
        let (execution, results) = self.store.snapshot_with_results(execution_id)?;
        if !execution.status.is_terminal() {
            return Err(Error::NotTerminal {
                id: execution.id,
                status: execution.status.to_string(),
            });
        }
        let report = build_report(&execution, &results)?;
        self.reports.save(&report)?;
        Ok(report)
    }

    pub fn list_executions(&self) -> Vec<TestExecution> {
        self.store.list()
    }

    /// Drop finished runs older than the retention window.
    pub fn evict_expired(&self) -> usize {
        let evicted = self.store.evict_expired(self.retention, now_ms());
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted finished executions");
        }
        evicted.len()
    }

    /// Today, last-week and overall outcome counts of the retained runs.
    pub fn statistics(&self) -> ExecutionStatistics {
        let now = now_ms();
        monitor::statistics(&self.store.list(), now, monitor::local_day_start(now))
    }

    /// Evaluate the alert rules that are due against the retained runs.
    pub fn check_alerts(&self) -> Vec<Alert> {
        self.alerts.check(&self.store.list(), now_ms())
    }

    pub fn alert_history(&self) -> Vec<Alert> {
        self.alerts.history()
    }

    /// Evict and check alerts periodically until the service is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let service: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match service.upgrade() {
                    Some(service) => {
                        service.evict_expired();
                        service.check_alerts();
                    }
                    None => break,
                }
            }
        })
    }

    /// Resolve once the run is terminal.
    pub async fn wait_for(&self, id: &str) -> Result<TestExecution> {
        let mut events = self.store.subscribe(id)?;
        while let Some(event) = events.next().await {
            if let ExecutionEvent::Finished(execution) = event {
                return Ok(execution);
            }
        }
        self.store.snapshot(id)
    }
}
