use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{Priority, TestType};

// ─── Execution Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Status only moves forward: Pending -> Running -> terminal.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        match self {
            ExecutionStatus::Pending => next != ExecutionStatus::Pending,
            ExecutionStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of one suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExecution {
    pub id: String,
    pub suite_id: String,
    #[serde(default)]
    pub suite_name: Option<String>,
    pub environment_id: String,
    pub status: ExecutionStatus,
    pub progress: f64,
    pub total_cases: usize,
    pub completed_cases: usize,
    pub passed_cases: usize,
    pub failed_cases: usize,
    pub cancel_requested: bool,
    #[serde(default)]
    pub result: Option<String>,
    pub created_at: u64,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub finished_at: Option<u64>,
    pub updated_at: u64,
}

impl TestExecution {
    pub fn pending(id: String, suite_id: String, environment_id: String, now: u64) -> Self {
        Self {
            id,
            suite_id,
            suite_name: None,
            environment_id,
            status: ExecutionStatus::Pending,
            progress: 0.0,
            total_cases: 0,
            completed_cases: 0,
            passed_cases: 0,
            failed_cases: 0,
            cancel_requested: false,
            result: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }
}

// ─── Log Types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExecutionLog {
    /// Position in the run's log, starting at 1.
    pub sequence: u64,
    pub execution_id: String,
    #[serde(default)]
    pub case_id: Option<String>,
    pub step: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub request: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub timestamp: u64,
}

/// A log line before the store assigns its run, sequence and timestamp.
#[derive(Debug, Clone)]
pub struct LogDraft {
    pub case_id: Option<String>,
    pub step: String,
    pub level: LogLevel,
    pub message: String,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub duration_ms: Option<u64>,
}

impl LogDraft {
    pub fn new(level: LogLevel, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            case_id: None,
            step: step.into(),
            level,
            message: message.into(),
            request: None,
            response: None,
            duration_ms: None,
        }
    }

    pub fn for_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_request(mut self, request: Value) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Pushed to live subscribers of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ExecutionEvent {
    Log(TestExecutionLog),
    Finished(TestExecution),
}

// ─── Case Results ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    Passed,
    Failed,
}

/// Outcome of evaluating one assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub description: String,
    pub passed: bool,
    pub actual: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    pub case_id: String,
    pub case_name: String,
    pub test_type: TestType,
    pub priority: Priority,
    pub status: CaseStatus,
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
    pub attempts: u32,
    pub response_time_ms: u64,
    pub started_at: u64,
    pub finished_at: u64,
    #[serde(default)]
    pub assertions: Vec<AssertionResult>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }
}

// ─── Report Types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub skipped_tests: usize,
    pub pass_rate: f64,
    pub average_response_time: u64,
    pub p95_response_time: u64,
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetail {
    pub test_case_id: String,
    pub test_case_name: String,
    pub test_type: TestType,
    pub status: CaseStatus,
    pub message: String,
    #[serde(default)]
    pub error_message: Option<String>,
    pub response_time: u64,
    pub start_time: u64,
    pub end_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub id: String,
    pub execution_id: String,
    pub suite_id: String,
    pub name: String,
    pub status: ExecutionStatus,
    pub summary: ReportSummary,
    pub details: Vec<ReportDetail>,
    pub created_at: u64,
    pub content_hash: String,
}
