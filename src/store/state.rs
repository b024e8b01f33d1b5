//! Registry of live and recently finished runs.
//!
//! Each run sits behind its own mutex holding the snapshot, the log buffer,
//! the case results and the push topic, so a reader always sees a status
//! together with its progress and never a half-written log entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use crate::domain::{
    millis, now_ms, CaseResult, ExecutionEvent, ExecutionStatus, LogDraft, LogLevel, TestExecution,
    TestExecutionLog,
};
use crate::error::{Error, Result};
use crate::store::broadcast::{EventStream, Topic};

struct RunState {
    execution: TestExecution,
    logs: Vec<TestExecutionLog>,
    results: Vec<CaseResult>,
    topic: Topic<ExecutionEvent>,
}

type SharedRun = Arc<Mutex<RunState>>;

fn lock(run: &SharedRun) -> MutexGuard<'_, RunState> {
    run.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ExecutionStore {
    runs: RwLock<HashMap<String, SharedRun>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, execution: TestExecution) {
        let run = Arc::new(Mutex::new(RunState {
            execution: execution.clone(),
            logs: Vec::new(),
            results: Vec::new(),
            topic: Topic::new(),
        }));
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution.id, run);
    }

    fn run(&self, id: &str) -> Result<SharedRun> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn mark_running(
        &self,
        id: &str,
        suite_name: &str,
        total_cases: usize,
    ) -> Result<TestExecution> {
        let run = self.run(id)?;
        let mut state = lock(&run);
        if !state.execution.status.can_transition_to(ExecutionStatus::Running) {
            return Ok(state.execution.clone());
        }
        let now = now_ms();
        let execution = &mut state.execution;
        execution.status = ExecutionStatus::Running;
        execution.suite_name = Some(suite_name.to_string());
        execution.total_cases = total_cases;
        execution.started_at = Some(now);
        execution.updated_at = now;
        Ok(execution.clone())
    }

    /// Append one log entry, push it to subscribers and mirror it to tracing.
    pub fn append_log(&self, id: &str, draft: LogDraft) -> Result<TestExecutionLog> {
        let run = self.run(id)?;
        let mut state = lock(&run);
        let entry = TestExecutionLog {
            sequence: u64::try_from(state.logs.len() + 1).unwrap_or(u64::MAX),
            execution_id: id.to_string(),
            case_id: draft.case_id,
            step: draft.step,
            level: draft.level,
            message: draft.message,
            request: draft.request,
            response: draft.response,
            duration_ms: draft.duration_ms,
            timestamp: now_ms(),
        };
        mirror(&entry);
        state.logs.push(entry.clone());
        state.topic.publish(ExecutionEvent::Log(entry.clone()));
        Ok(entry)
    }

    /// Store a finished case and move progress in the same critical section.
    pub fn record_case_result(&self, id: &str, result: CaseResult) -> Result<TestExecution> {
        let run = self.run(id)?;
        let mut state = lock(&run);
        let passed = result.passed();
        state.results.push(result);

        let execution = &mut state.execution;
        execution.completed_cases += 1;
        if passed {
            execution.passed_cases += 1;
        } else {
            execution.failed_cases += 1;
        }
        execution.progress = progress(execution.completed_cases, execution.total_cases);
        execution.updated_at = now_ms();
        Ok(execution.clone())
    }

    pub fn request_cancel(&self, id: &str) -> Result<TestExecution> {
        let run = self.run(id)?;
        let mut state = lock(&run);
        if !state.execution.status.is_terminal() {
            state.execution.cancel_requested = true;
            state.execution.updated_at = now_ms();
        }
        Ok(state.execution.clone())
    }

    /// Move a run to a terminal status, publish the final snapshot and close
    /// the topic. A run that is already terminal is returned unchanged.
    pub fn finish(
        &self,
        id: &str,
        status: ExecutionStatus,
        message: impl Into<String>,
        finished_at: u64,
    ) -> Result<TestExecution> {
        let run = self.run(id)?;
        let mut state = lock(&run);
        if !state.execution.status.can_transition_to(status) {
            return Ok(state.execution.clone());
        }
        let snapshot = concluded(&state.execution, status, message.into(), finished_at);
        state.execution = snapshot.clone();
        state.topic.publish(ExecutionEvent::Finished(snapshot.clone()));
        state.topic.close();
        Ok(snapshot)
    }

    pub fn snapshot(&self, id: &str) -> Result<TestExecution> {
        Ok(lock(&self.run(id)?).execution.clone())
    }

    pub fn logs(&self, id: &str) -> Result<Vec<TestExecutionLog>> {
        Ok(lock(&self.run(id)?).logs.clone())
    }

    pub fn results(&self, id: &str) -> Result<Vec<CaseResult>> {
        Ok(lock(&self.run(id)?).results.clone())
    }

    /// Snapshot and results read under one lock.
    pub fn snapshot_with_results(&self, id: &str) -> Result<(TestExecution, Vec<CaseResult>)> {
        let run = self.run(id)?;
        let state = lock(&run);
        Ok((state.execution.clone(), state.results.clone()))
    }

    pub fn subscribe(&self, id: &str) -> Result<EventStream<ExecutionEvent>> {
        let run = self.run(id)?;
        let mut state = lock(&run);
        let stream = state.topic.subscribe();
        tracing::debug!(
            execution_id = id,
            subscribers = state.topic.subscriber_count(),
            "log subscriber attached"
        );
        Ok(stream)
    }

    /// Drop runs that reached a terminal status more than `retention` ago.
    pub fn evict_expired(&self, retention: Duration, now: u64) -> Vec<String> {
        let cutoff = now.saturating_sub(millis(retention));
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = runs
            .iter()
            .filter(|(_, run)| {
                let state = lock(run);
                state.execution.status.is_terminal()
                    && state.execution.finished_at.is_some_and(|at| at <= cutoff)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            runs.remove(id);
        }
        expired
    }

    /// Every retained run, newest first.
    pub fn list(&self) -> Vec<TestExecution> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        let mut executions: Vec<TestExecution> =
            runs.values().map(|run| lock(run).execution.clone()).collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        executions
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The snapshot a run will have once it reaches `status`.
pub fn concluded(
    execution: &TestExecution,
    status: ExecutionStatus,
    message: String,
    finished_at: u64,
) -> TestExecution {
    let mut execution = execution.clone();
    execution.status = status;
    execution.result = Some(message);
    execution.finished_at = Some(finished_at);
    execution.updated_at = finished_at;
    if status == ExecutionStatus::Completed {
        execution.progress = 100.0;
    }
    execution
}

fn progress(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    completed as f64 / total as f64 * 100.0
}

fn mirror(entry: &TestExecutionLog) {
    let case_id = entry.case_id.as_deref().unwrap_or("-");
    let (execution_id, step, message) = (&entry.execution_id, &entry.step, &entry.message);
    match entry.level {
        LogLevel::Debug => tracing::debug!(%execution_id, case_id, %step, "{message}"),
        LogLevel::Info => tracing::info!(%execution_id, case_id, %step, "{message}"),
        LogLevel::Warn => tracing::warn!(%execution_id, case_id, %step, "{message}"),
        LogLevel::Error => tracing::error!(%execution_id, case_id, %step, "{message}"),
    }
}
