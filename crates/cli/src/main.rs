use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rollwatch_core::{Transition, TransitionKind};
use rollwatch_tracker::spawn_tracker;
use tokio::signal;
use tracing::{error, info, warn};

mod version;

#[derive(Parser, Debug)]
#[command(name = "rollwatch", version, about = "Report Deployment rollouts as they start and complete")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace to watch (default: all namespaces)
    #[arg(short = 'n', long = "ns", global = true)]
    namespace: Option<String>,

    /// More log output (-v debug, -vv trace); overrides ROLLWATCH_LOG
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Serve Prometheus metrics on host:port
    #[arg(long = "metrics-addr", env = "ROLLWATCH_METRICS_ADDR", global = true)]
    metrics_addr: Option<SocketAddr>,

    /// Capacity of the event and notification queues
    #[arg(long = "queue-cap", env = "ROLLWATCH_QUEUE_CAP", global = true, default_value_t = 1024)]
    queue_cap: usize,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch Deployments and print rollout transitions (default)
    Watch,
    /// Print version with build metadata
    Version,
}

fn init_tracing(verbose: u8) {
    let env = match verbose {
        0 => std::env::var("ROLLWATCH_LOG").unwrap_or_else(|_| "info".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics(addr: Option<SocketAddr>) {
    let Some(addr) = addr else { return };
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!(%addr, "serving Prometheus metrics"),
        Err(e) => warn!(error = %e, %addr, "metrics exporter not installed; continuing without it"),
    }
}

#[derive(serde::Serialize)]
struct Row<'a> {
    kind: TransitionKind,
    namespace: Option<&'a str>,
    name: &'a str,
    at: String,
}

fn render(t: &Transition, output: Output) -> Result<String> {
    Ok(match output {
        Output::Human => match t.kind {
            TransitionKind::RollingOut => format!("~ {} rolling out", t.identity),
            TransitionKind::RolledOut => format!("✓ {} rolled out", t.identity),
        },
        Output::Json => serde_json::to_string(&Row {
            kind: t.kind,
            namespace: t.identity.namespace.as_deref(),
            name: &t.identity.name,
            at: chrono::Utc::now().to_rfc3339(),
        })?,
    })
}

async fn watch(namespace: Option<String>, output: Output, queue_cap: usize) -> Result<()> {
    info!(ns = ?namespace, queue_cap, "watch invoked");
    let (event_tx, handle) = spawn_tracker(queue_cap);
    let mut notifications = handle.notifications;
    let stop = handle.stop;

    let mut watcher_handle = tokio::spawn(async move {
        rollwatch_kubehub::start_watcher(namespace.as_deref(), event_tx).await
    });

    // one listener for the whole loop so a signal between polls is not lost
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            maybe = notifications.recv() => {
                match maybe {
                    Some(t) => match render(&t, output) {
                        Ok(line) => println!("{}", line),
                        Err(e) => break Err(e),
                    },
                    None => {
                        warn!("notification channel closed; exiting watch loop");
                        break Ok(());
                    }
                }
            }
            res = &mut watcher_handle => {
                break match res {
                    Ok(Ok(())) => {
                        warn!("watcher finished");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        error!(error = ?e, "watcher failed");
                        Err(e)
                    }
                    Err(e) => Err(anyhow!("watcher task failed: {}", e)),
                };
            }
            _ = &mut ctrl_c => {
                info!("Ctrl-C received; shutting down watch loop");
                break Ok(());
            }
        }
    };

    // Graceful shutdown: stop the tracker loop, abort watcher to stop the kube stream
    stop.stop();
    drop(notifications);
    watcher_handle.abort();
    let _ = handle.task.await;
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => {
            init_metrics(cli.metrics_addr);
            watch(cli.namespace, cli.output, cli.queue_cap).await?;
        }
        Commands::Version => {
            let v = version::version_string(version::build_metadata())?;
            match cli.output {
                Output::Human => println!("{}", v),
                Output::Json => println!("{}", serde_json::json!({ "version": v })),
            }
        }
    }

    Ok(())
}
