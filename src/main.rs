//! # arith-orchestrator CLI
//!
//! ## Usage
//!
//! ```bash
//! # Start a server in-process, send the file, write ops_txt_results.txt, stop
//! arith-orchestrator run ops.txt
//!
//! # Long-running server
//! arith-orchestrator serve --port 9000 --output results.txt
//!
//! # Client only
//! arith-orchestrator send ops.txt --port 9000
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output
//! - `RUST_LOG=info`: log level filter

use arith_orchestrator::config::{self, OrchestratorConfig};
use arith_orchestrator::paths::build_output_path;
use arith_orchestrator::transport::{run_local, ArithmeticClient, ArithmeticServer, Endpoint};
use arith_orchestrator::{metrics, OrchestratorError};
use std::path::PathBuf;

/// What to do.
#[derive(Debug, PartialEq)]
enum Command {
    /// Server and client in one process.
    Run { input: PathBuf },
    /// Server only.
    Serve,
    /// Client only.
    Send { input: PathBuf },
}

/// Parsed CLI arguments.
#[derive(Debug, PartialEq)]
struct Args {
    command: Command,
    /// Optional TOML config file.
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u32>,
    workers: Option<usize>,
    /// Output path override.
    output: Option<PathBuf>,
}

/// Parse command-line arguments manually (no external arg parser dependency).
fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut command_name: Option<String> = None;
    let mut input: Option<PathBuf> = None;
    let mut config = None;
    let mut host = None;
    let mut port = None;
    let mut workers = None;
    let mut output = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || -> Result<String, String> {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match flag {
            "--config" | "-c" => config = Some(PathBuf::from(value()?)),
            "--host" => host = Some(value()?),
            "--port" | "-p" => {
                let v = value()?;
                port = Some(v.parse().map_err(|_| format!("invalid port: {v}"))?);
            }
            "--workers" | "-w" => {
                let v = value()?;
                workers = Some(v.parse().map_err(|_| format!("invalid worker count: {v}"))?);
            }
            "--output" | "-o" => output = Some(PathBuf::from(value()?)),
            "--help" | "-h" => return Err(usage()),
            other if other.starts_with('-') => {
                return Err(format!("unknown argument: {other}\n{}", usage()));
            }
            positional if command_name.is_none() => command_name = Some(positional.to_string()),
            positional if input.is_none() => input = Some(PathBuf::from(positional)),
            extra => return Err(format!("unexpected argument: {extra}\n{}", usage())),
        }
        i += 1;
    }

    let command = match (command_name.as_deref(), input) {
        (Some("run"), Some(input)) => Command::Run { input },
        (Some("send"), Some(input)) => Command::Send { input },
        (Some("serve"), None) => Command::Serve,
        (Some("run" | "send"), None) => return Err(format!("missing input file\n{}", usage())),
        (Some("serve"), Some(_)) => return Err(format!("serve takes no input file\n{}", usage())),
        (Some(other), _) => return Err(format!("unknown command: {other}\n{}", usage())),
        (None, _) => return Err(usage()),
    };

    Ok(Args {
        command,
        config,
        host,
        port,
        workers,
        output,
    })
}

/// Print usage information.
fn usage() -> String {
    [
        "Usage: arith-orchestrator <COMMAND> [OPTIONS]",
        "",
        "Commands:",
        "  run <FILE>            Start a server, send FILE to it, write results, stop",
        "  serve                 Serve connections until Ctrl+C",
        "  send <FILE>           Send FILE to a running server",
        "",
        "FILE is plain text, or a .zip, .tar.xz or .7z archive holding a .txt file.",
        "",
        "Options:",
        "  --config, -c <FILE>   TOML configuration file",
        "  --host <IP>           Server address (default: 127.0.0.1)",
        "  --port, -p <PORT>     Server port (default: 9000)",
        "  --workers, -w <N>     Max concurrent units (default: available parallelism)",
        "  --output, -o <FILE>   Results file (default: derived from input name)",
        "  --help, -h            Show this help message",
    ]
    .join("\n")
}

/// Merge the config file (if any) with command-line overrides and validate.
fn resolve_config(args: &Args) -> Result<OrchestratorConfig, OrchestratorError> {
    let mut cfg = match &args.config {
        Some(path) => config::load_from_file(path)?,
        None => OrchestratorConfig::default(),
    };
    if let Some(host) = &args.host {
        cfg.server.host = host.clone();
    }
    if let Some(port) = args.port {
        cfg.server.port = port;
    }
    if let Some(workers) = args.workers {
        cfg.scheduler.max_workers = Some(workers);
    }
    config::validate(&cfg).map_err(|errors| {
        OrchestratorError::Config(config::ConfigError::Validation(
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
        ))
    })?;
    Ok(cfg)
}

async fn run(args: Args) -> Result<(), OrchestratorError> {
    let cfg = resolve_config(&args)?;

    match args.command {
        Command::Run { input } => {
            let output = args.output.unwrap_or_else(|| build_output_path(&input));
            let run = run_local(&cfg, &input, &output).await?;
            eprintln!(
                "{} expressions: {} ok, {} failed ({} bytes) -> {}",
                run.report.total,
                run.report.succeeded,
                run.report.failed,
                run.bytes,
                output.display()
            );
        }
        Command::Serve => {
            let output = args
                .output
                .unwrap_or_else(|| PathBuf::from("results.txt"));
            let server = ArithmeticServer::from_config(&cfg, output).await?;
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("ctrl-c received, shutting down");
                }
                let _ = shutdown_tx.send(true);
            });
            let served = server.run(shutdown_rx).await;
            eprintln!("served {served} connections");
        }
        Command::Send { input } => {
            let output = args.output.unwrap_or_else(|| build_output_path(&input));
            let client = ArithmeticClient::new(Endpoint::from_config(&cfg.server)?)
                .with_read_chunk_bytes(cfg.server.read_chunk_bytes);
            let bytes = client.send_file(&input, &output).await?;
            eprintln!("received {bytes} bytes -> {}", output.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let _ = arith_orchestrator::init_tracing();
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "metrics disabled");
    }

    let raw: Vec<String> = std::env::args().collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
