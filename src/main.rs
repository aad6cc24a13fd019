//! canroute CLI entry point.
//!
//! Runs a router from a TOML file, lists device types and prints an example
//! configuration.
//!
//! ```bash
//! canroute example > canroute.toml
//! canroute run canroute.toml --stdin
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use canroute::core::logging::AlarmEvent;
use canroute::core::metadata::device_registry;
use canroute::gateway::{AppConfig, DeviceType, RouterTask, TaskRunner};
use canroute::monitor::{Statistics, StatusSnapshot};
use canroute::transport::VirtualBus;
use canroute::{CanMessage, Result, RouterError};

// ============================================================================
// CLI
// ============================================================================

/// CAN bus identifier/mask router
#[derive(Parser, Debug)]
#[command(name = "canroute", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the router
    Run {
        /// Configuration file path
        config: PathBuf,

        /// Output events as JSON Lines
        #[arg(long)]
        jsonl: bool,

        /// Send frames read from stdin, one `123#DEADBEEF` per line
        #[arg(long)]
        stdin: bool,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List supported device types
    ListDevices,

    /// Print an example configuration
    Example,
}

// ============================================================================
// Router Events
// ============================================================================

/// Everything the router publishes, as one stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RouterEvent {
    Message { channel: String, message: CanMessage },
    Statistics(Statistics),
    Status(StatusSnapshot),
    Alarm(AlarmEvent),
}

fn print_event(event: &RouterEvent) {
    match event {
        RouterEvent::Message { channel, message } => {
            println!("[{}] {}", channel, message);
        }
        RouterEvent::Statistics(stats) => {
            println!(
                "[STATS] msg_tx={} msg_rx={} tx={}B rx={}B errors={}",
                stats.msg_tx, stats.msg_rx, stats.tx, stats.rx, stats.error_count
            );
        }
        RouterEvent::Status(status) => {
            if !status.error.is_empty() {
                println!("[STATUS] {}", status.error);
            }
        }
        RouterEvent::Alarm(alarm) => {
            println!("[ALARM] {}", alarm);
        }
    }
}

/// Forward a broadcast channel into the merged event stream.
fn forward<T, F>(mut rx: broadcast::Receiver<T>, tx: mpsc::UnboundedSender<RouterEvent>, wrap: F)
where
    T: Clone + Send + 'static,
    F: Fn(T) -> RouterEvent + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(item) => {
                    if tx.send(wrap(item)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Push `cansend`-style lines from stdin into the write queue.
fn spawn_stdin_writer(writer: mpsc::Sender<CanMessage>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<CanMessage>() {
                Ok(msg) => {
                    if writer.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("Ignoring {:?}: {}", line, e),
            }
        }
    });
}

// ============================================================================
// Commands
// ============================================================================

async fn run(config_path: PathBuf, jsonl: bool, from_stdin: bool) -> Result<()> {
    let config = AppConfig::from_file(&config_path)?;

    if config.router.device_type == DeviceType::Virtual {
        // A standalone virtual bus only sees traffic that is echoed back
        let _ = VirtualBus::named(&config.router.device).with_loopback();
    }

    let mut task = RouterTask::new(config.router)?;
    for w in &config.watches {
        if !task.watch(&w.name, w.id, w.mask) {
            return Err(RouterError::config(format!("cannot watch {:?}", w.name)));
        }
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    for w in &config.watches {
        if let Some(rx) = task.subscribe(&w.name) {
            let channel = w.name.clone();
            forward(rx, event_tx.clone(), move |message| RouterEvent::Message {
                channel: channel.clone(),
                message,
            });
        }
    }
    forward(task.subscribe_stats(), event_tx.clone(), RouterEvent::Statistics);
    forward(task.subscribe_status(), event_tx.clone(), RouterEvent::Status);
    forward(task.subscribe_alarms(), event_tx, RouterEvent::Alarm);

    if from_stdin {
        spawn_stdin_writer(task.writer());
    }

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if jsonl {
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{}", json);
                }
            } else {
                print_event(&event);
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut runner = TaskRunner::new(task);
    let mut handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    eprintln!("Router started. Press Ctrl+C to stop.");

    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nShutting down...");
            let _ = shutdown_tx.send(true);
            handle.await
        }
    };

    printer.abort();
    let _ = printer.await;

    joined.map_err(|e| RouterError::invalid_state(format!("router task failed: {}", e)))?
}

fn list_devices() {
    let registry = device_registry();

    println!("Supported devices:");
    println!();

    for device in registry.devices() {
        let availability = if device.available {
            ""
        } else {
            " (not available in this build)"
        };
        println!(
            "  {} ({}){}",
            device.device_type, device.display_name, availability
        );
        println!("    {}", device.description);
        if device.extended_status {
            println!("    Reports controller status and accepts a baud rate");
        }
        println!("    Parameters:");
        for param in &device.parameters {
            let required = if param.required { " (required)" } else { "" };
            println!("      - {}{}: {}", param.name, required, param.description);
        }
        println!();
    }

    println!("Print an example configuration with:");
    println!("  canroute example > canroute.toml");
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,canroute=debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            jsonl,
            stdin,
            verbose,
        } => {
            init_tracing(verbose);

            if !config.exists() {
                eprintln!("Error: Config file not found: {:?}", config);
                return ExitCode::FAILURE;
            }

            match run(config, jsonl, stdin).await {
                Ok(()) => {
                    eprintln!("Router stopped.");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::ListDevices => {
            list_devices();
            ExitCode::SUCCESS
        }
        Commands::Example => {
            print!("{}", AppConfig::example_toml());
            ExitCode::SUCCESS
        }
    }
}
