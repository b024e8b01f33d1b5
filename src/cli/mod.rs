//! Command-line entry points for running suites in CI pipelines.

mod output;

use clap::{Subcommand, ValueEnum};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::commands::ExecutionService;
use crate::config::EngineSettings;
use crate::domain::{AuthKind, ExecutionEvent, ExecutionStatus, TestCaseConfig};
use crate::error::Result;
use crate::repository::{Fixture, InMemoryRepository};

/// Output format for logs and the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one suite against one environment and print its report
    Run {
        /// JSON file with environments, global variables, test cases and suites
        #[arg(long)]
        fixtures: PathBuf,

        /// Suite id to run
        #[arg(long)]
        suite: String,

        /// Environment id to run against
        #[arg(long = "env")]
        environment: String,

        /// Engine settings (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Also write the report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check every test case configuration without sending requests
    Validate {
        #[arg(long)]
        fixtures: PathBuf,
    },
}

/// Run a command. `Ok(false)` means it ran but did not succeed.
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            fixtures,
            suite,
            environment,
            config,
            format,
            report,
        } => {
            let settings = match config {
                Some(path) => EngineSettings::load(&path)?,
                None => EngineSettings::default(),
            };
            run(&fixtures, &suite, &environment, &settings, format, report.as_deref()).await
        }
        Commands::Validate { fixtures } => {
            let problems = validate(&Fixture::load(&fixtures)?);
            for problem in &problems {
                println!("invalid  {problem}");
            }
            println!("{} problem(s) found", problems.len());
            Ok(problems.is_empty())
        }
    }
}

async fn run(
    fixtures: &Path,
    suite_id: &str,
    environment_id: &str,
    settings: &EngineSettings,
    format: OutputFormat,
    report_path: Option<&Path>,
) -> Result<bool> {
    let repository = Arc::new(InMemoryRepository::from_fixture(Fixture::load(fixtures)?));
    let service = ExecutionService::from_settings(repository, settings)?;
    let queued = service.execute(suite_id, environment_id)?;

    // Subscribe before reading the backlog; sequence numbers drop duplicates.
    let mut events = service.stream_logs(&queued.id)?;
    let mut last_sequence = 0;
    for log in service.get_logs(&queued.id)? {
        last_sequence = log.sequence;
        output::print_event(&ExecutionEvent::Log(log), format)?;
    }

    let mut finished = None;
    while let Some(event) = events.next().await {
        match &event {
            ExecutionEvent::Log(log) if log.sequence <= last_sequence => continue,
            ExecutionEvent::Log(log) => last_sequence = log.sequence,
            ExecutionEvent::Finished(execution) => finished = Some(execution.clone()),
        }
        output::print_event(&event, format)?;
    }

    let execution = match finished {
        Some(execution) => execution,
        None => service.get_execution(&queued.id)?,
    };
    let report = service.generate_report(&execution.id)?;
    output::print_report(&report, format)?;

    if let Some(path) = report_path {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    }

    Ok(execution.status == ExecutionStatus::Completed)
}

/// Every configuration problem a run of these fixtures would abort on.
pub fn validate(fixture: &Fixture) -> Vec<String> {
    let mut problems = Vec::new();

    let case_ids: HashSet<&str> = fixture.test_cases.iter().map(|case| case.id.as_str()).collect();
    for case in &fixture.test_cases {
        if let Err(err) = TestCaseConfig::from_value(&case.config) {
            problems.push(format!("test case `{}`: {err}", case.id));
        }
    }

    for suite in &fixture.suites {
        for link in &suite.cases {
            if !case_ids.contains(link.test_case_id.as_str()) {
                problems.push(format!(
                    "suite `{}`: unknown test case `{}`",
                    suite.suite.id, link.test_case_id
                ));
            }
        }
    }

    for environment in &fixture.environments {
        let Some(auth) = &environment.auth else {
            continue;
        };
        match auth.kind {
            AuthKind::OAuth2 => problems.push(format!(
                "environment `{}`: oauth2 authentication is not supported",
                environment.id
            )),
            AuthKind::Jwt if auth.login_url.is_none() || auth.credentials.is_none() => {
                problems.push(format!(
                    "environment `{}`: jwt auth requires loginUrl and credentials",
                    environment.id
                ))
            }
            _ => {}
        }
    }

    problems
}
