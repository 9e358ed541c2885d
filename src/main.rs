use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use insights_bench::config::WorkloadConfig;
use insights_bench::parser::parse_request;
use insights_bench::runner::{CloudWatchSearchRunner, OperationOutcome, OPERATION_TYPE};
use insights_bench::{CompilerConfig, InsightsCompiler, TimeRange};

#[derive(Parser)]
#[command(name = "insights-bench", version)]
#[command(about = "OpenSearch DSL benchmarks against CloudWatch Logs Insights", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a DSL body (file or stdin) into an Insights query
    Translate {
        file: Option<PathBuf>,

        /// Width of the query window in hours
        #[arg(long, default_value_t = 24)]
        hours: u32,

        /// Insert `match` values into the regex unescaped
        #[arg(long)]
        verbatim_match: bool,
    },
    /// Translate DSL bodies interactively
    Repl {
        #[arg(long)]
        verbatim_match: bool,
    },
    /// Run workload operations against CloudWatch Logs
    Run {
        #[arg(long, default_value = "workload.json")]
        workload: PathBuf,

        /// Only run this operation
        #[arg(long)]
        operation: Option<String>,

        #[arg(long, default_value_t = 1)]
        iterations: u32,
    },
}

fn compiler(verbatim_match: bool) -> InsightsCompiler {
    InsightsCompiler::with_config(CompilerConfig {
        verbatim_match,
        ..Default::default()
    })
}

fn translate_body(compiler: &InsightsCompiler, body: &Value, hours: u32) -> Result<String> {
    let request = parse_request(body)?;
    let query = compiler.compile(&request, TimeRange::last_hours(hours, Utc::now()))?;
    Ok(query.query_string())
}

fn translate(file: Option<PathBuf>, hours: u32, verbatim_match: bool) -> Result<()> {
    let input = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let body: Value = serde_json::from_str(&input).context("input is not valid JSON")?;
    println!("{}", translate_body(&compiler(verbatim_match), &body, hours)?);
    Ok(())
}

fn repl(verbatim_match: bool) -> Result<()> {
    let compiler = compiler(verbatim_match);
    let mut editor = DefaultEditor::new()?;
    println!("Enter a DSL body per line, Ctrl-D to quit.");

    loop {
        match editor.readline("dsl> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;
                let result = serde_json::from_str::<Value>(line)
                    .map_err(anyhow::Error::from)
                    .and_then(|body| translate_body(&compiler, &body, 24));
                match result {
                    Ok(query) => println!("✅ {}", query),
                    Err(e) => println!("⚠️ {}", e),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn run(workload: PathBuf, operation: Option<String>, iterations: u32) -> Result<()> {
    let config = WorkloadConfig::from_json_file(&workload)?;
    let operations = match &operation {
        Some(name) => vec![config.operation(name)?.clone()],
        None => config.operations().to_vec(),
    };
    if operations.is_empty() {
        bail!("workload {} has no operations", workload.display());
    }

    let mut runner: CloudWatchSearchRunner = CloudWatchSearchRunner::default();
    for op in &operations {
        if op.operation_type != OPERATION_TYPE {
            tracing::warn!(operation = %op.name, kind = %op.operation_type, "skipping operation of unknown type");
            continue;
        }
        for iteration in 1..=iterations {
            let started = Instant::now();
            let outcome = match runner.run(op).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(operation = %op.name, iteration, "iteration failed: {}", e);
                    OperationOutcome::from_error(&e, started.elapsed(), None)
                }
            };
            println!("{} #{} {}", op.name, iteration, serde_json::to_string(&outcome)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "insights_bench=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Translate {
            file,
            hours,
            verbatim_match,
        } => translate(file, hours, verbatim_match),
        Commands::Repl { verbatim_match } => repl(verbatim_match),
        Commands::Run {
            workload,
            operation,
            iterations,
        } => run(workload, operation, iterations).await,
    }
}
