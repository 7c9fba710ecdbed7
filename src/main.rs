//! `nlq`: turn a natural-language request into a validated JQL or SOQL query.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use nlquery::agent_core::{AgentError, RunReport};
use nlquery::{config, init_tracing, jira, salesforce};

#[derive(Debug, Parser)]
#[command(name = "nlq", version, about = "Natural-language to JQL/SOQL")]
struct Cli {
    /// Config file (default: nlquery.yaml found upward from the working directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model invocations allowed before the run is aborted.
    #[arg(long, global = true)]
    max_turns: Option<u32>,

    /// Execute the tool calls of one model reply concurrently.
    #[arg(long, global = true)]
    parallel: bool,

    /// Print the conversation transcript to stderr.
    #[arg(long, global = true)]
    trace: bool,

    /// Run the final query and attach the first rows to the answer.
    #[arg(long, global = true)]
    execute: bool,

    /// Rows fetched by `--execute`.
    #[arg(long, global = true, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    rows: u32,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a Jira JQL query.
    Jql {
        /// Run behind a supervisor, which adds `agent_comment` to the answer.
        #[arg(long)]
        supervisor: bool,

        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
    },
    /// Build a Salesforce SOQL query.
    Soql {
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
    },
}

impl Command {
    fn request(&self) -> String {
        match self {
            Command::Jql { request, .. } | Command::Soql { request } => request.join(" "),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(max_turns) = cli.max_turns {
        config.agent.max_turns = max_turns;
    }
    if cli.parallel {
        config.agent.parallel_tool_calls = true;
    }
    config.validate()?;
    init_tracing(&config.logging, cli.log_file.as_deref()).context("failed to initialise logging")?;

    let request = cli.command.request();
    if request.trim().is_empty() {
        bail!("the request is empty");
    }

    let is_jql = matches!(cli.command, Command::Jql { .. });
    let report = match cli.command {
        Command::Jql { supervisor, .. } => jira::run_jql_agent(&config, &request, supervisor).await,
        Command::Soql { .. } => salesforce::run_soql_agent(&config, &request).await,
    };
    let mut report = match report {
        Ok(report) => report,
        Err(e) => return Ok(fail(&e)),
    };

    if let (true, Ok(result)) = (cli.execute, report.result.as_mut()) {
        let max_rows = cli.rows as usize;
        if is_jql {
            jira::execute_jql(&config, result, max_rows).await?;
        } else {
            salesforce::execute_soql(&config, result, max_rows).await?;
        }
    }

    if cli.trace {
        eprintln!("{}", report.conversation.transcript());
    }
    finish(report)
}

fn finish(report: RunReport) -> anyhow::Result<ExitCode> {
    tracing::info!(turns = report.turns, state = ?report.final_state, "run finished");
    match report.result {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(fail(&e)),
    }
}

fn fail(error: &AgentError) -> ExitCode {
    if let Some(raw) = error.raw_text().filter(|r| !r.is_empty()) {
        eprintln!("model output:\n{raw}");
    }
    eprintln!("error: {error}");
    if let AgentError::Invoker(e) = error {
        if e.is_auth_error() {
            eprintln!("hint: check `llm.api_key` in the config or OPENAI_API_KEY");
        }
    }
    ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jql_with_global_flags() {
        let cli = Cli::try_parse_from([
            "nlq",
            "--max-turns",
            "5",
            "jql",
            "--supervisor",
            "bugs",
            "created",
            "last",
            "month",
            "--trace",
        ])
        .unwrap();
        assert_eq!(cli.max_turns, Some(5));
        assert!(cli.trace);
        assert!(matches!(cli.command, Command::Jql { supervisor: true, .. }));
        assert_eq!(cli.command.request(), "bugs created last month");
    }

    #[test]
    fn test_soql_requires_request() {
        assert!(Cli::try_parse_from(["nlq", "soql"]).is_err());
        let cli = Cli::try_parse_from(["nlq", "--parallel", "soql", "open deals"]).unwrap();
        assert!(cli.parallel);
        assert_eq!(cli.command.request(), "open deals");
        assert!(!cli.execute);
        assert_eq!(cli.rows, 50);
    }

    #[test]
    fn test_execute_flags() {
        let cli = Cli::try_parse_from(["nlq", "soql", "--execute", "--rows", "10", "open deals"]).unwrap();
        assert!(cli.execute);
        assert_eq!(cli.rows, 10);
        assert!(Cli::try_parse_from(["nlq", "--rows", "0", "soql", "open deals"]).is_err());
    }
}
