//! Runs one test case: compose, send, assert, extract.
//!
//! Extraction runs on every response that reached the assertions, so a
//! failing case still binds what it could read.
//!
//! Nothing raised inside a case escapes this module. Errors and panics end
//! the case as FAILED with the captured message.

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::EngineSettings;
use crate::domain::{
    millis, now_ms, AssertionResult, CaseResult, CaseStatus, LogDraft, LogLevel, ResponsePayload,
    TestCase, TestCaseConfig,
};
use crate::engine::assertion::evaluate_all;
use crate::engine::env::{value_to_text, ExecutionContext};
use crate::engine::extract::extract_values;
use crate::engine::http::{compose, Transport};
use crate::error::Error;
use crate::store::ExecutionStore;

/// Engine-wide defaults a case falls back to.
#[derive(Debug, Clone)]
pub struct CasePolicy {
    pub default_timeout: Duration,
    pub default_retries: u32,
    pub retry_delay: Duration,
    pub retry_on_assertion_failure: bool,
}

impl From<&EngineSettings> for CasePolicy {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            default_timeout: Duration::from_millis(settings.default_timeout_ms),
            default_retries: settings.default_retries,
            retry_delay: settings.retry_delay(),
            retry_on_assertion_failure: settings.retry_on_assertion_failure,
        }
    }
}

impl Default for CasePolicy {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

struct Verdict {
    status: CaseStatus,
    message: String,
    error: Option<String>,
    response_time_ms: Option<u64>,
    assertions: Vec<AssertionResult>,
}

impl Verdict {
    fn failed(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            status: CaseStatus::Failed,
            message: message.into(),
            error,
            response_time_ms: None,
            assertions: Vec::new(),
        }
    }

    fn error(err: Error) -> Self {
        Self::failed(err.to_string(), Some(err.to_string()))
    }
}

fn to_json(value: &impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct CaseRunner<'a> {
    transport: &'a dyn Transport,
    store: &'a ExecutionStore,
    execution_id: &'a str,
    policy: &'a CasePolicy,
}

impl<'a> CaseRunner<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        store: &'a ExecutionStore,
        execution_id: &'a str,
        policy: &'a CasePolicy,
    ) -> Self {
        Self {
            transport,
            store,
            execution_id,
            policy,
        }
    }

    fn log(&self, case: &TestCase, draft: LogDraft) {
        let draft = draft.for_case(case.id.clone());
        if let Err(err) = self.store.append_log(self.execution_id, draft) {
            tracing::warn!(execution_id = %self.execution_id, "dropping case log: {err}");
        }
    }

    pub async fn run(
        &self,
        case: &TestCase,
        config: &TestCaseConfig,
        context: &mut ExecutionContext,
    ) -> CaseResult {
        let started_at = now_ms();
        let clock = Instant::now();
        self.log(
            case,
            LogDraft::new(
                LogLevel::Info,
                "case",
                format!("Running case {} ({:?} priority)", case.name, case.priority),
            ),
        );

        let mut attempts = 0u32;
        let verdict = match AssertUnwindSafe(self.drive(case, config, context, &mut attempts))
            .catch_unwind()
            .await
        {
            Ok(verdict) => verdict,
            Err(panic) => {
                let message =
                    format!("case aborted unexpectedly: {}", panic_message(panic.as_ref()));
                Verdict::failed(message.clone(), Some(message))
            }
        };

        let wall_ms = millis(clock.elapsed());
        let finish = match verdict.status {
            CaseStatus::Passed => LogDraft::new(
                LogLevel::Info,
                "case",
                format!("Case {} PASSED in {wall_ms} ms", case.name),
            ),
            CaseStatus::Failed => LogDraft::new(
                LogLevel::Error,
                "case",
                format!("Case {} FAILED: {}", case.name, verdict.message),
            ),
        };
        self.log(case, finish.with_duration(wall_ms));

        CaseResult {
            case_id: case.id.clone(),
            case_name: case.name.clone(),
            test_type: case.test_type,
            priority: case.priority,
            status: verdict.status,
            message: verdict.message,
            error: verdict.error,
            attempts: attempts.max(1),
            response_time_ms: verdict.response_time_ms.unwrap_or(wall_ms),
            started_at,
            finished_at: now_ms(),
            assertions: verdict.assertions,
        }
    }

    async fn drive(
        &self,
        case: &TestCase,
        config: &TestCaseConfig,
        context: &mut ExecutionContext,
        attempts: &mut u32,
    ) -> Verdict {
        let budget = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.policy.default_timeout);
        let budget_ms = millis(budget);
        let retries = config.retries.unwrap_or(self.policy.default_retries);
        let deadline = Instant::now() + budget;
        let mut warned: HashSet<String> = HashSet::new();

        loop {
            *attempts += 1;
            let attempt = *attempts;

            // Composing
            let composition = match compose(config, context) {
                Ok(composition) => composition,
                Err(err) => return Verdict::error(err),
            };
            for token in composition.unresolved {
                if !warned.insert(token.clone()) {
                    continue;
                }
                self.log(
                    case,
                    LogDraft::new(
                        LogLevel::Warn,
                        "resolve",
                        format!("Unresolved variable ${{{token}}} left as is"),
                    ),
                );
            }
            let request = composition.request;
            self.log(
                case,
                LogDraft::new(
                    LogLevel::Info,
                    "request",
                    format!("Attempt {attempt}: {} {}", request.method, request.url),
                )
                .with_request(to_json(&request)),
            );

            // Sent
            let remaining = deadline.saturating_duration_since(Instant::now());
            let sent = if remaining.is_zero() {
                Err(Error::Timeout(budget_ms))
            } else {
                tokio::time::timeout(remaining, self.transport.send(&request, remaining))
                    .await
                    .unwrap_or(Err(Error::Timeout(budget_ms)))
            };

            let response = match sent {
                Ok(response) => response,
                Err(Error::Timeout(_)) => {
                    let err = Error::Timeout(budget_ms);
                    self.log(case, LogDraft::new(LogLevel::Error, "request", err.to_string()));
                    return Verdict::failed("timeout", Some(err.to_string()));
                }
                Err(err) => {
                    self.log(
                        case,
                        LogDraft::new(
                            LogLevel::Warn,
                            "request",
                            format!("Attempt {attempt} failed: {err}"),
                        ),
                    );
                    if err.is_retryable()
                        && attempt <= retries
                        && self.pause(deadline, attempt).await
                    {
                        continue;
                    }
                    return Verdict::failed(format!("request failed: {err}"), Some(err.to_string()));
                }
            };
            self.log_response(case, &response);

            // Asserting
            let results = match evaluate_all(&config.assertions, &response) {
                Ok(results) => results,
                Err(err) => return Verdict::error(err),
            };
            for result in &results {
                let level = if result.passed { LogLevel::Info } else { LogLevel::Warn };
                self.log(case, LogDraft::new(level, "assertion", result.message.clone()));
            }
            let failures: Vec<&str> = results
                .iter()
                .filter(|result| !result.passed)
                .map(|result| result.message.as_str())
                .collect();

            // Extracting
            self.extract(case, config, &response, context);

            if !failures.is_empty() {
                let reasons = failures.join("; ");
                self.log(
                    case,
                    LogDraft::new(
                        LogLevel::Warn,
                        "assertion",
                        format!(
                            "{} of {} assertions failed: {reasons}",
                            failures.len(),
                            results.len()
                        ),
                    ),
                );
                if self.policy.retry_on_assertion_failure
                    && attempt <= retries
                    && self.pause(deadline, attempt).await
                {
                    continue;
                }
                return Verdict {
                    status: CaseStatus::Failed,
                    message: reasons,
                    error: None,
                    response_time_ms: Some(response.elapsed_ms),
                    assertions: results,
                };
            }

            return Verdict {
                status: CaseStatus::Passed,
                message: format!("{} assertions passed", results.len()),
                error: None,
                response_time_ms: Some(response.elapsed_ms),
                assertions: results,
            };
        }
    }

    /// Back off `retry_delay × attempt` before the next attempt. False when
    /// the remaining budget cannot cover the wait.
    async fn pause(&self, deadline: Instant, attempt: u32) -> bool {
        let delay = self.policy.retry_delay.saturating_mul(attempt);
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining <= delay {
            return false;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        true
    }

    fn log_response(&self, case: &TestCase, response: &ResponsePayload) {
        self.log(
            case,
            LogDraft::new(
                LogLevel::Info,
                "response",
                format!(
                    "{} {} in {} ms ({} bytes)",
                    response.status, response.status_text, response.elapsed_ms, response.size
                ),
            )
            .with_response(to_json(response))
            .with_duration(response.elapsed_ms),
        );
    }

    fn extract(
        &self,
        case: &TestCase,
        config: &TestCaseConfig,
        response: &ResponsePayload,
        context: &mut ExecutionContext,
    ) {
        if config.extract.is_empty() {
            return;
        }
        let outcome = extract_values(&config.extract, &response.body);
        for warning in outcome.warnings {
            self.log(case, LogDraft::new(LogLevel::Warn, "extract", warning));
        }
        for (name, value) in outcome.bound {
            self.log(
                case,
                LogDraft::new(
                    LogLevel::Debug,
                    "extract",
                    format!("Extracted {name} = {}", value_to_text(&value)),
                ),
            );
            context.bind_extracted(&case.id, &name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TestExecution, TestExecutionLog};
    use crate::test_support::{environment, test_case, MockTransport, Reply};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn policy() -> CasePolicy {
        CasePolicy {
            default_timeout: Duration::from_secs(5),
            default_retries: 0,
            retry_delay: Duration::ZERO,
            retry_on_assertion_failure: false,
        }
    }

    fn store() -> ExecutionStore {
        let store = ExecutionStore::new();
        store.create(TestExecution::pending("run".into(), "suite".into(), "env".into(), 0));
        store
    }

    fn steps<'l>(logs: &'l [TestExecutionLog], step: &str) -> Vec<&'l TestExecutionLog> {
        logs.iter().filter(|log| log.step == step).collect()
    }

    async fn run_one(
        transport: &MockTransport,
        store: &ExecutionStore,
        policy: &CasePolicy,
        config: Value,
        context: &mut ExecutionContext,
    ) -> CaseResult {
        let case = test_case("c1", Priority::Medium, config);
        let parsed = TestCaseConfig::from_value(&case.config).unwrap();
        CaseRunner::new(transport, store, "run", policy)
            .run(&case, &parsed, context)
            .await
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new(&environment("http://svc"), &[])
    }

    #[tokio::test]
    async fn retries_network_failures_until_success() {
        let transport = MockTransport::new()
            .on("/items", Reply::NetworkError("connection reset".into()))
            .on("/items", Reply::NetworkError("connection reset".into()))
            .on("/items", Reply::ok(json!({"ok": true})));
        let store = store();
        let result = run_one(
            &transport,
            &store,
            &policy(),
            json!({"method": "GET", "endpoint": "/items", "retries": 2,
                   "assertions": [{"type": "statusCode", "expected": 200}]}),
            &mut context(),
        )
        .await;

        assert!(result.passed());
        assert_eq!(result.attempts, 3);
        let logs = store.logs("run").unwrap();
        assert_eq!(steps(&logs, "request").iter().filter(|l| l.request.is_some()).count(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_the_transport_error() {
        let transport = MockTransport::new().with_fallback(Reply::NetworkError("refused".into()));
        let store = store();
        let result = run_one(
            &transport,
            &store,
            &policy(),
            json!({"method": "GET", "endpoint": "/items", "retries": 1}),
            &mut context(),
        )
        .await;

        assert_eq!(result.status, CaseStatus::Failed);
        assert_eq!(result.attempts, 2);
        assert!(result.error.unwrap().contains("refused"));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn all_assertions_are_logged_without_short_circuit() {
        let transport = MockTransport::new().with_fallback(Reply::Text(200, "hello".into()));
        let store = store();
        let result = run_one(
            &transport,
            &store,
            &policy(),
            json!({"method": "GET", "endpoint": "/x", "retries": 3, "assertions": [
                {"type": "statusCode", "expected": 200},
                {"type": "bodyContains", "expected": "X"}
            ]}),
            &mut context(),
        )
        .await;

        assert_eq!(result.status, CaseStatus::Failed);
        assert_eq!(result.assertions.len(), 2);
        assert!(result.assertions[0].passed);
        assert!(!result.assertions[1].passed);
        // assertion retries are off in this policy
        assert_eq!(transport.requests().len(), 1);

        let logs = store.logs("run").unwrap();
        let assertion_logs = steps(&logs, "assertion");
        assert_eq!(assertion_logs.len(), 3);
        assert!(assertion_logs[0].message.contains("status code"));
        assert!(assertion_logs[1].message.contains("body"));
        assert!(assertion_logs[2].message.contains("1 of 2 assertions failed"));
    }

    #[test]
    fn assertion_failures_retry_by_default() {
        assert!(CasePolicy::default().retry_on_assertion_failure);
    }

    #[tokio::test]
    async fn assertion_failures_are_retried() {
        let transport = MockTransport::new()
            .on("/x", Reply::Json(503, json!({})))
            .on("/x", Reply::ok(json!({})));
        let store = store();
        let policy = CasePolicy {
            retry_on_assertion_failure: true,
            ..policy()
        };
        let result = run_one(
            &transport,
            &store,
            &policy,
            json!({"method": "GET", "endpoint": "/x", "retries": 1,
                   "assertions": [{"type": "statusCode", "expected": 200}]}),
            &mut context(),
        )
        .await;
        assert!(result.passed());
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn timeout_fails_without_further_attempts() {
        let transport = MockTransport::new().with_fallback(Reply::Hang);
        let store = store();
        let result = run_one(
            &transport,
            &store,
            &policy(),
            json!({"method": "GET", "endpoint": "/slow", "timeoutMs": 50, "retries": 3}),
            &mut context(),
        )
        .await;

        assert_eq!(result.status, CaseStatus::Failed);
        assert_eq!(result.message, "timeout");
        assert_eq!(result.attempts, 1);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn extraction_binds_values_for_later_cases() {
        let transport = MockTransport::new()
            .with_fallback(Reply::ok(json!({"data": {"id": 7, "items": [{"id": 1}, {"id": 2}]}})));
        let store = store();
        let mut ctx = context();
        let result = run_one(
            &transport,
            &store,
            &policy(),
            json!({"method": "GET", "endpoint": "/x", "extract": {
                "userId": "$.data.id",
                "itemIds": "$.data.items[*].id",
                "missing": "$.data.nothing"
            }}),
            &mut ctx,
        )
        .await;

        assert!(result.passed());
        assert_eq!(ctx.extracted("userId"), Some(&json!(7)));
        assert_eq!(ctx.extracted("c1.userId"), Some(&json!(7)));
        assert_eq!(ctx.extracted("itemIds"), Some(&json!([1, 2])));
        assert!(ctx.extracted("missing").is_none());

        let logs = store.logs("run").unwrap();
        let warnings: Vec<_> = steps(&logs, "extract")
            .into_iter()
            .filter(|log| log.level == LogLevel::Warn)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("missing"));
    }

    #[tokio::test]
    async fn failed_case_still_binds_extracted_values() {
        let transport = MockTransport::new().with_fallback(Reply::ok(json!({"data": {"id": 7}})));
        let store = store();
        let mut ctx = context();
        let result = run_one(
            &transport,
            &store,
            &policy(),
            json!({"method": "POST", "endpoint": "/users",
                   "assertions": [{"type": "statusCode", "expected": 201}],
                   "extract": {"userId": "$.data.id"}}),
            &mut ctx,
        )
        .await;
        assert_eq!(result.status, CaseStatus::Failed);
        assert_eq!(ctx.extracted("userId"), Some(&json!(7)));

        let follow_up =
            TestCaseConfig::from_value(&json!({"method": "GET", "endpoint": "/users/${userId}"}))
            .unwrap();
        let next = test_case("c2", Priority::Medium, json!({}));
        CaseRunner::new(&transport, &store, "run", &policy())
            .run(&next, &follow_up, &mut ctx)
            .await;
        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["http://svc/users", "http://svc/users/7"]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_grows_with_each_attempt() {
        let sent_at = Arc::new(Mutex::new(Vec::new()));
        let recorder = sent_at.clone();
        let transport = MockTransport::new()
            .on("/items", Reply::NetworkError("reset".into()))
            .on("/items", Reply::NetworkError("reset".into()))
            .on("/items", Reply::ok(json!({})))
            .on_request(move |_, _| recorder.lock().unwrap().push(Instant::now()));
        let store = store();
        let policy = CasePolicy {
            retry_delay: Duration::from_millis(100),
            ..policy()
        };
        let result = run_one(
            &transport,
            &store,
            &policy,
            json!({"method": "GET", "endpoint": "/items", "retries": 2}),
            &mut context(),
        )
        .await;

        assert!(result.passed());
        let sent_at = sent_at.lock().unwrap();
        assert_eq!(sent_at.len(), 3);
        assert_eq!(sent_at[1] - sent_at[0], Duration::from_millis(100));
        assert_eq!(sent_at[2] - sent_at[1], Duration::from_millis(200));
    }

    #[tokio::test]
    async fn unresolved_token_warns_once_across_retries() {
        let transport = MockTransport::new()
            .on("/u/", Reply::NetworkError("reset".into()))
            .on("/u/", Reply::NetworkError("reset".into()))
            .on("/u/", Reply::ok(json!({})));
        let store = store();
        let result = run_one(
            &transport,
            &store,
            &policy(),
            json!({"method": "GET", "endpoint": "/u/${missing}/${missing}", "retries": 2}),
            &mut context(),
        )
        .await;

        assert!(result.passed());
        assert_eq!(result.attempts, 3);
        let logs = store.logs("run").unwrap();
        let warnings: Vec<_> = steps(&logs, "resolve")
            .into_iter()
            .filter(|log| log.level == LogLevel::Warn)
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn unresolved_token_produces_one_warning() {
        let transport = MockTransport::new();
        let store = store();
        let result = run_one(
            &transport,
            &store,
            &policy(),
            json!({"method": "GET", "endpoint": "/users/${missing}"}),
            &mut context(),
        )
        .await;

        assert!(result.passed());
        assert_eq!(transport.requests()[0].url, "http://svc/users/${missing}");
        let logs = store.logs("run").unwrap();
        let warnings = steps(&logs, "resolve");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, LogLevel::Warn);
        assert!(warnings[0].message.contains("${missing}"));
    }

    #[tokio::test]
    async fn panics_inside_a_case_become_failures() {
        let transport = MockTransport::new().on_request(|_, _| panic!("transport exploded"));
        let store = store();
        let result = run_one(
            &transport,
            &store,
            &policy(),
            json!({"method": "GET", "endpoint": "/x"}),
            &mut context(),
        )
        .await;
        assert_eq!(result.status, CaseStatus::Failed);
        assert!(result.message.contains("transport exploded"));
    }
}
