//! Drives one suite run from pending to a terminal status.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::domain::{
    now_ms, AuthKind, ExecutionStatus, LogDraft, LogLevel, SuiteCase, TestCase, TestCaseConfig,
};
use crate::engine::auth::{self, AuthOutcome};
use crate::engine::cancel::CancelSignal;
use crate::engine::case_runner::{CasePolicy, CaseRunner};
use crate::engine::env::ExecutionContext;
use crate::engine::http::Transport;
use crate::engine::report::build_report;
use crate::error::{Error, Result};
use crate::repository::ConfigRepository;
use crate::store::state::concluded;
use crate::store::{ExecutionStore, ReportStore};

/// One enabled case with its validated configuration.
#[derive(Debug, Clone)]
pub struct PlannedCase {
    pub link: SuiteCase,
    pub case: TestCase,
    pub config: TestCaseConfig,
}

/// Priority descending, then execution order, then creation time.
pub fn order_cases(plan: &mut [PlannedCase]) {
    plan.sort_by(|a, b| {
        b.case
            .priority
            .cmp(&a.case.priority)
            .then(a.link.execution_order.cmp(&b.link.execution_order))
            .then(a.link.created_at.cmp(&b.link.created_at))
            .then(a.case.created_at.cmp(&b.case.created_at))
    });
}

enum RunEnd {
    Finished,
    Cancelled,
}

pub struct Orchestrator {
    repository: Arc<dyn ConfigRepository>,
    transport: Arc<dyn Transport>,
    store: Arc<ExecutionStore>,
    reports: Arc<dyn ReportStore>,
    policy: CasePolicy,
}

impl Orchestrator {
    pub fn new(
        repository: Arc<dyn ConfigRepository>,
        transport: Arc<dyn Transport>,
        store: Arc<ExecutionStore>,
        reports: Arc<dyn ReportStore>,
        policy: CasePolicy,
    ) -> Self {
        Self {
            repository,
            transport,
            store,
            reports,
            policy,
        }
    }

    fn log(&self, execution_id: &str, draft: LogDraft) {
        if let Err(err) = self.store.append_log(execution_id, draft) {
            tracing::warn!(execution_id, "dropping run log: {err}");
        }
    }

    /// Run the suite and leave the execution in a terminal status, whatever
    /// happens on the way.
    pub async fn run(&self, execution_id: &str, mut signal: CancelSignal) {
        let outcome = AssertUnwindSafe(self.drive(execution_id, &mut signal))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::Internal("run task panicked".to_string())));

        let (status, message) = match outcome {
            Ok(RunEnd::Cancelled) => match self.store.snapshot(execution_id) {
                Ok(snapshot) => (
                    ExecutionStatus::Cancelled,
                    format!(
                        "Cancelled after {} of {} cases",
                        snapshot.completed_cases, snapshot.total_cases
                    ),
                ),
                Err(err) => (ExecutionStatus::Cancelled, err.to_string()),
            },
            Ok(RunEnd::Finished) => match self.store.snapshot(execution_id) {
                Ok(snapshot) if snapshot.failed_cases == 0 => (
                    ExecutionStatus::Completed,
                    format!("All {} cases passed", snapshot.completed_cases),
                ),
                Ok(snapshot) => (
                    ExecutionStatus::Failed,
                    format!(
                        "{} of {} cases failed",
                        snapshot.failed_cases, snapshot.completed_cases
                    ),
                ),
                Err(err) => (ExecutionStatus::Failed, err.to_string()),
            },
            Err(err) => {
                let message = format!("Run aborted: {err}");
                self.log(execution_id, LogDraft::new(LogLevel::Error, "run", message.clone()));
                (ExecutionStatus::Failed, message)
            }
        };

        self.conclude(execution_id, status, message);
    }

    /// Store the report, then publish the terminal status.
    fn conclude(&self, execution_id: &str, status: ExecutionStatus, mut message: String) {
        let finished_at = now_ms();
        match self.store.snapshot_with_results(execution_id) {
            Ok((snapshot, results)) => {
                let terminal = concluded(&snapshot, status, message.clone(), finished_at);
                let saved =
                    build_report(&terminal, &results).and_then(|report| self.reports.save(&report));
                if let Err(err) = saved {
                    self.log(
                        execution_id,
                        LogDraft::new(
                            LogLevel::Error,
                            "report",
                            format!("Report not stored: {err}"),
                        ),
                    );
                    message = format!("{message} (report not stored: {err})");
                }
            }
            Err(err) => {
                tracing::error!(execution_id, "run vanished before it finished: {err}");
                return;
            }
        }

        let level = match status {
            ExecutionStatus::Completed => LogLevel::Info,
            ExecutionStatus::Cancelled => LogLevel::Warn,
            _ => LogLevel::Error,
        };
        self.log(execution_id, LogDraft::new(level, "run", format!("Run {status}: {message}")));
        if let Err(err) = self.store.finish(execution_id, status, message, finished_at) {
            tracing::error!(execution_id, "failed to finish run: {err}");
        }
    }

    async fn drive(&self, execution_id: &str, signal: &mut CancelSignal) -> Result<RunEnd> {
        let execution = self.store.snapshot(execution_id)?;
        let repository = self.repository.as_ref();

        let suite = repository.get_suite(&execution.suite_id).await?;
        let links = repository.get_enabled_suite_cases(&suite.id).await?;
        let environment = repository.get_environment(&execution.environment_id).await?;
        let globals = repository.get_global_variables(&environment.id).await?;

        let mut plan = Vec::with_capacity(links.len());
        for link in links.into_iter().filter(|link| link.is_enabled) {
            let case = repository.get_test_case(&link.test_case_id).await?;
            let config = TestCaseConfig::from_value(&case.config).map_err(|err| match err {
                Error::Configuration(message) => {
                    Error::Configuration(format!("test case `{}`: {message}", case.id))
                }
                other => other,
            })?;
            plan.push(PlannedCase { link, case, config });
        }
        order_cases(&mut plan);

        self.store.mark_running(execution_id, &suite.name, plan.len())?;
        self.log(
            execution_id,
            LogDraft::new(
                LogLevel::Info,
                "run",
                format!(
                    "Running suite {} with {} enabled cases against {}",
                    suite.name,
                    plan.len(),
                    environment.name
                ),
            ),
        );

        let mut context = ExecutionContext::new(&environment, &globals);
        let outcome = auth::authenticate(
            &mut context,
            self.transport.as_ref(),
            self.policy.default_timeout,
        )
        .await?;
        match outcome {
            AuthOutcome::Skipped => {}
            AuthOutcome::StaticHeader(header) => self.log(
                execution_id,
                LogDraft::new(
                    LogLevel::Info,
                    "auth",
                    format!("Using static credentials in {header}"),
                ),
            ),
            AuthOutcome::LoggedIn { url, .. } => self.log(
                execution_id,
                LogDraft::new(LogLevel::Info, "auth", format!("Logged in via {url}")),
            ),
        }

        let runner = CaseRunner::new(
            self.transport.as_ref(),
            &self.store,
            execution_id,
            &self.policy,
        );
        for (index, planned) in plan.iter().enumerate() {
            if signal.is_cancelled() {
                return Ok(self.halt(execution_id, plan.len() - index));
            }
            self.refresh_if_expired(execution_id, &mut context).await;

            let result = runner.run(&planned.case, &planned.config, &mut context).await;
            self.store.record_case_result(execution_id, result)?;
        }

        // A stop that arrived during the last case still cancels the run.
        if signal.is_cancelled() {
            return Ok(self.halt(execution_id, 0));
        }
        Ok(RunEnd::Finished)
    }

    fn halt(&self, execution_id: &str, not_started: usize) -> RunEnd {
        self.log(
            execution_id,
            LogDraft::new(
                LogLevel::Warn,
                "run",
                format!("Stop requested; {not_started} cases not started"),
            ),
        );
        RunEnd::Cancelled
    }

    async fn refresh_if_expired(&self, execution_id: &str, context: &mut ExecutionContext) {
        let due = context
            .auth
            .as_ref()
            .is_some_and(|auth| auth.kind == AuthKind::Jwt && auth.auto_refresh)
            && context.tokens.is_expired(now_ms());
        if !due {
            return;
        }

        match auth::refresh(context, self.transport.as_ref(), self.policy.default_timeout).await {
            Ok(_) => self.log(
                execution_id,
                LogDraft::new(LogLevel::Info, "auth", "Access token refreshed"),
            ),
            Err(err) => self.log(
                execution_id,
                LogDraft::new(
                    LogLevel::Warn,
                    "auth",
                    format!("Token refresh failed, keeping the current token: {err}"),
                ),
            ),
        }
    }
}
