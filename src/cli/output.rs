use std::fmt::Write as _;

use super::OutputFormat;
use crate::domain::{CaseStatus, ExecutionEvent, TestExecutionLog, TestReport};
use crate::error::Result;

pub fn print_event(event: &ExecutionEvent, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Text => match event {
            ExecutionEvent::Log(log) => println!("{}", format_log(log)),
            ExecutionEvent::Finished(execution) => println!(
                "== run {} {}: {}",
                execution.id,
                execution.status,
                execution.result.as_deref().unwrap_or_default()
            ),
        },
    }
    Ok(())
}

pub fn print_report(report: &TestReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => print!("{}", format_report(report)),
    }
    Ok(())
}

fn format_log(log: &TestExecutionLog) -> String {
    let level = format!("{:?}", log.level).to_uppercase();
    let mut line = format!(
        "{level:>5} [{}] {}: {}",
        log.case_id.as_deref().unwrap_or("run"),
        log.step,
        log.message
    );
    if let Some(ms) = log.duration_ms {
        let _ = write!(line, " ({ms} ms)");
    }
    line
}

fn format_report(report: &TestReport) -> String {
    let summary = &report.summary;
    let mut out = String::new();
    let _ = writeln!(out, "\n{} ({})", report.name, report.status);
    let _ = writeln!(
        out,
        "  {} passed, {} failed, {} skipped of {} ({:.2}% pass rate)",
        summary.passed_tests,
        summary.failed_tests,
        summary.skipped_tests,
        summary.total_tests,
        summary.pass_rate
    );
    let _ = writeln!(
        out,
        "  response time: avg {} ms, p95 {} ms",
        summary.average_response_time, summary.p95_response_time
    );
    for detail in &report.details {
        let mark = match detail.status {
            CaseStatus::Passed => "PASS",
            CaseStatus::Failed => "FAIL",
        };
        let _ = writeln!(
            out,
            "  {mark} {} ({} ms)",
            detail.test_case_name, detail.response_time
        );
        if detail.status == CaseStatus::Failed {
            let _ = writeln!(out, "       {}", detail.message);
        }
    }
    out
}
