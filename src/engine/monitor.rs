//! Run statistics and alert rules over the retained executions.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::domain::{millis, ExecutionStatus, TestExecution};
use crate::engine::report::round_to_2;

const HOUR_MS: u64 = 3_600_000;
const DAY_MS: u64 = 24 * HOUR_MS;
const LONG_RUN_MS: u64 = 30 * 60_000;
const CONSECUTIVE_FAILURE_LIMIT: usize = 3;

/// Outcome counts for one time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage of Completed runs, 2 decimals.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatistics {
    pub today: PeriodStats,
    pub week: PeriodStats,
    pub overall: PeriodStats,
    pub running: usize,
    pub generated_at: u64,
}

/// Runs that never started count from their creation time.
fn started(execution: &TestExecution) -> u64 {
    execution.started_at.unwrap_or(execution.created_at)
}

fn period<'a>(executions: impl Iterator<Item = &'a TestExecution>) -> PeriodStats {
    let mut stats = PeriodStats::default();
    for execution in executions {
        stats.total += 1;
        match execution.status {
            ExecutionStatus::Completed => stats.passed += 1,
            ExecutionStatus::Failed => stats.failed += 1,
            _ => {}
        }
    }
    if stats.total > 0 {
        stats.success_rate = round_to_2(stats.passed as f64 / stats.total as f64 * 100.0);
    }
    stats
}

/// Counts for today (since `day_start`), the last seven days and overall.
pub fn statistics(executions: &[TestExecution], now: u64, day_start: u64) -> ExecutionStatistics {
    let week_start = now.saturating_sub(7 * DAY_MS);
    ExecutionStatistics {
        today: period(executions.iter().filter(|e| started(e) >= day_start)),
        week: period(executions.iter().filter(|e| started(e) >= week_start)),
        overall: period(executions.iter()),
        running: executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Running)
            .count(),
        generated_at: now,
    }
}

/// Local midnight of the day containing `now`, in epoch milliseconds.
pub fn local_day_start(now: u64) -> u64 {
    i64::try_from(now)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|utc| utc.with_timezone(&Local))
        .and_then(|local| local.date_naive().and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .and_then(|start| u64::try_from(start.timestamp_millis()).ok())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    /// More than half of the runs started in the last hour failed.
    HighFailureRate,
    /// A run has been Running for more than 30 minutes.
    LongRunning,
    /// The last three decided runs of the past two hours all failed.
    ConsecutiveFailures,
}

impl AlertRule {
    pub const ALL: [AlertRule; 3] = [
        AlertRule::HighFailureRate,
        AlertRule::LongRunning,
        AlertRule::ConsecutiveFailures,
    ];

    /// Quiet period after a rule fired.
    pub fn check_interval(self) -> Duration {
        match self {
            AlertRule::HighFailureRate => Duration::from_secs(300),
            AlertRule::LongRunning => Duration::from_secs(60),
            AlertRule::ConsecutiveFailures => Duration::from_secs(120),
        }
    }

    /// Message when the rule holds for `executions` at `now`.
    pub fn evaluate(self, executions: &[TestExecution], now: u64) -> Option<String> {
        match self {
            AlertRule::HighFailureRate => {
                let since = now.saturating_sub(HOUR_MS);
                let recent = period(executions.iter().filter(|e| started(e) >= since));
                (recent.total > 0 && recent.failed * 2 > recent.total).then(|| {
                    format!(
                        "{} of {} runs started in the last hour failed",
                        recent.failed, recent.total
                    )
                })
            }
            AlertRule::LongRunning => executions
                .iter()
                .filter(|e| e.status == ExecutionStatus::Running)
                .find_map(|e| {
                    let running_for = now.saturating_sub(started(e));
                    (running_for > LONG_RUN_MS).then(|| {
                        format!("run {} has been running for {} min", e.id, running_for / 60_000)
                    })
                }),
            AlertRule::ConsecutiveFailures => {
                let since = now.saturating_sub(2 * HOUR_MS);
                let mut recent: Vec<&TestExecution> =
                    executions.iter().filter(|e| started(e) >= since).collect();
                recent.sort_by_key(|e| std::cmp::Reverse(started(e)));

                let mut failures = 0;
                for execution in recent {
                    match execution.status {
                        ExecutionStatus::Failed => failures += 1,
                        ExecutionStatus::Completed => break,
                        _ => {}
                    }
                }
                (failures >= CONSECUTIVE_FAILURE_LIMIT)
                    .then(|| format!("{failures} consecutive runs failed"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub rule: AlertRule,
    pub message: String,
    pub triggered_at: u64,
}

#[derive(Default)]
struct MonitorState {
    /// Set once a rule has fired; later checks wait out its interval.
    last_checked: HashMap<AlertRule, u64>,
    history: Vec<Alert>,
}

/// Evaluates every [`AlertRule`] and keeps the alerts that fired.
#[derive(Default)]
pub struct AlertMonitor {
    state: Mutex<MonitorState>,
}

impl AlertMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the rules that are due and return the alerts raised now.
    pub fn check(&self, executions: &[TestExecution], now: u64) -> Vec<Alert> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut raised = Vec::new();

        for rule in AlertRule::ALL {
            if let Some(last) = state.last_checked.get(&rule) {
                if now < last.saturating_add(millis(rule.check_interval())) {
                    continue;
                }
                state.last_checked.insert(rule, now);
            }
            let Some(message) = rule.evaluate(executions, now) else {
                continue;
            };
            tracing::warn!(rule = ?rule, "alert: {message}");
            let alert = Alert {
                rule,
                message,
                triggered_at: now,
            };
            state.last_checked.insert(rule, now);
            state.history.push(alert.clone());
            raised.push(alert);
        }
        raised
    }

    pub fn history(&self) -> Vec<Alert> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .clone()
    }
}
