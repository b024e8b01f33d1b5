use hdrhistogram::Histogram;

use crate::domain::{CaseResult, ReportDetail, ReportSummary, TestExecution, TestReport};
use crate::error::{Error, Result};

pub(crate) fn round_to_2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn report_id(execution_id: &str) -> String {
    format!("report-{execution_id}")
}

pub fn summarize(execution: &TestExecution, results: &[CaseResult]) -> Result<ReportSummary> {
    let total_tests = execution.total_cases.max(results.len());
    let passed_tests = results.iter().filter(|r| r.passed()).count();
    let failed_tests = results.len() - passed_tests;

    let mut latency = Histogram::<u64>::new_with_bounds(1, 3_600_000, 3)
        .map_err(|err| Error::Storage(format!("Failed to initialize latency histogram: {err}")))?;
    let mut total_ms = 0u64;
    for result in results {
        total_ms = total_ms.saturating_add(result.response_time_ms);
        latency.saturating_record(result.response_time_ms.max(1));
    }

    let (average_response_time, p95_response_time) = if results.is_empty() {
        (0, 0)
    } else {
        (
            total_ms / results.len() as u64,
            latency.value_at_quantile(0.95),
        )
    };

    let pass_rate = if total_tests == 0 {
        0.0
    } else {
        round_to_2(passed_tests as f64 / total_tests as f64 * 100.0)
    };

    Ok(ReportSummary {
        total_tests,
        passed_tests,
        failed_tests,
        skipped_tests: total_tests - results.len(),
        pass_rate,
        average_response_time,
        p95_response_time,
        start_time: execution.started_at,
        end_time: execution.finished_at,
    })
}

/// Build the report of a terminal execution. The output depends only on the
/// recorded data, so regenerating it yields the same content hash.
pub fn build_report(execution: &TestExecution, results: &[CaseResult]) -> Result<TestReport> {
    let summary = summarize(execution, results)?;
    let details: Vec<ReportDetail> = results
        .iter()
        .map(|result| ReportDetail {
            test_case_id: result.case_id.clone(),
            test_case_name: result.case_name.clone(),
            test_type: result.test_type,
            status: result.status,
            message: result.message.clone(),
            error_message: result.error.clone(),
            response_time: result.response_time_ms,
            start_time: result.started_at,
            end_time: result.finished_at,
        })
        .collect();

    let hashed = serde_json::to_string(&(&summary, &details))?;
    let content_hash = format!("{:x}", md5::compute(hashed.as_bytes()));
    let suite_label = execution.suite_name.as_deref().unwrap_or(&execution.suite_id);

    Ok(TestReport {
        id: report_id(&execution.id),
        execution_id: execution.id.clone(),
        suite_id: execution.suite_id.clone(),
        name: format!("{suite_label} report"),
        status: execution.status,
        summary,
        details,
        created_at: execution.finished_at.unwrap_or(execution.updated_at),
        content_hash,
    })
}
