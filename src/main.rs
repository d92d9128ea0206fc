//! rstchart - statechart runner
//!
//! Loads a chart file, runs one session of it and prints the outcome.

use clap::{Parser, Subcommand};
use rstchart_core::Event;
use rstchart_runtime::{load_chart, Config, Runtime, SessionHandle, SpawnOptions};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rstchart")]
#[command(about = "Run and validate statecharts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a chart to completion
    Run {
        /// Chart file (.json, .yaml or .yml)
        chart: PathBuf,

        /// External event to send, as NAME or NAME=JSON (repeatable)
        #[arg(short, long = "event")]
        events: Vec<String>,

        /// Also read events from stdin, one per line (NAME, NAME=JSON or an event object)
        #[arg(long)]
        stdin: bool,

        /// Session id (generated if omitted)
        #[arg(long)]
        session_id: Option<String>,

        /// Write checkpoints to this directory and resume from it
        #[arg(long, env = "RSTCHART_CHECKPOINT_DIR")]
        checkpoint_dir: Option<PathBuf>,

        /// How long to keep the session running after the last event, so
        /// delayed sends can still fire
        #[arg(long, default_value_t = 0)]
        wait_ms: u64,
    },

    /// Validate a chart and print a summary
    Check {
        /// Chart file (.json, .yaml or .yml)
        chart: PathBuf,
    },
}

/// Parses `NAME`, `NAME=JSON` or a JSON event object.
fn parse_event(spec: &str) -> Result<Event, Box<dyn std::error::Error>> {
    let spec = spec.trim();
    if spec.starts_with('{') {
        return Ok(serde_json::from_str(spec)?);
    }
    match spec.split_once('=') {
        Some((name, data)) => {
            let data: Value = serde_json::from_str(data)?;
            Ok(Event::external(name.trim(), data))
        }
        None => Ok(Event::new(spec)),
    }
}

async fn feed_stdin(handle: &SessionHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        handle.send(parse_event(&line)?).await?;
    }
    Ok(())
}

async fn run(
    config: Config,
    chart_path: PathBuf,
    events: Vec<String>,
    stdin: bool,
    session_id: Option<String>,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::new(config)?;
    let chart = runtime.register_chart_file(&chart_path)?;
    tracing::info!(
        "Loaded chart '{}' ({} states) from {}",
        chart.name(),
        chart.state_count(),
        chart_path.display()
    );

    let resumed = match &session_id {
        Some(id) => runtime.resume_latest(chart.name(), id)?,
        None => None,
    };
    let handle = match resumed {
        Some(handle) => {
            tracing::info!("Resumed session {} from checkpoint", handle.id());
            handle
        }
        None => {
            let options = SpawnOptions {
                session_id,
                ..SpawnOptions::default()
            };
            runtime.spawn_with(chart.name(), options)?
        }
    };

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling session");
            cancel.cancel();
        }
    });

    for spec in &events {
        handle.send(parse_event(spec)?).await?;
    }
    if stdin {
        feed_stdin(&handle).await?;
    }

    let session_id = handle.id().to_string();
    let outcome = handle.close_after(wait).await?;
    runtime.shutdown().await;

    let report = json!({
        "session_id": session_id,
        "result": outcome,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check(chart_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let chart = load_chart(&chart_path)?;
    let report = json!({
        "name": chart.name(),
        "checksum": chart.checksum(),
        "datamodel": chart.datamodel(),
        "states": chart.state_count(),
        "transitions": chart.transitions().len(),
        "invokes": chart.invokes().len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            chart,
            events,
            stdin,
            session_id,
            checkpoint_dir,
            wait_ms,
        } => {
            // Load configuration (from file if RSTCHART_CONFIG is set, then env overrides)
            let mut config = match Config::load() {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {}", e);
                    return Err(e.into());
                }
            };
            if let Some(dir) = checkpoint_dir {
                config.checkpoint.enabled = true;
                config.checkpoint.dir = dir;
            }

            run(
                config,
                chart,
                events,
                stdin,
                session_id,
                Duration::from_millis(wait_ms),
            )
            .await
        }
        Commands::Check { chart } => check(chart),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event() {
        let ev = parse_event("open").unwrap();
        assert_eq!(ev.name, "open");
        assert_eq!(ev.data, Value::Null);

        let ev = parse_event(r#"order={"total": 120}"#).unwrap();
        assert_eq!(ev.name, "order");
        assert_eq!(ev.data["total"], 120);

        let ev = parse_event(r#"{"name": "ping", "data": [1, 2]}"#).unwrap();
        assert_eq!(ev.name, "ping");
        assert_eq!(ev.data, json!([1, 2]));

        assert!(parse_event("bad={").is_err());
    }
}
