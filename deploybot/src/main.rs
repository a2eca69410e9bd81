use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use deploybot_core::analytics::AnalyticsStore;
use deploybot_core::config::DaemonConfig;
use deploybot_core::deploy_monitor::DeployMonitor;
use deploybot_core::event_bus::EventBus;
use deploybot_core::notification::NotificationDispatcher;
use deploybot_core::orchestrator::Orchestrator;
use deploybot_core::project_registry::ProjectRegistry;
use deploybot_core::timer::TimerEngine;
use deploybot_core::activity_log::{ActivityEntry, ActivityLogSink};
use deploybot_observability::{init_process_logging, ProcessKind};
use deploybot_gateway::{router, GatewayState};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "deploybot")]
#[command(about = "Headless deploy-propagation productivity daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon: start the timer ticker, the deploy monitor, and
    /// serve the client gateway.
    Serve {
        #[arg(long)]
        config_dir: Option<PathBuf>,
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate a project folder against the registry's contract
    /// (`config.json`, `TODO.md`, writable, has a `logs/` dir).
    Validate {
        path: PathBuf,
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
    /// Append a synthetic deploy start/complete pair to a project's deploy
    /// log, for exercising the pipeline without a real deploy wrapper.
    SimulateDeploy {
        project: String,
        #[arg(long, default_value = "firebase deploy")]
        command: String,
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
    /// Print monitored projects, active timers, and subscriber count.
    Status {
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config_dir, bind, port } => {
            if let Err(err) = serve(config_dir, bind, port).await {
                error!("fatal startup error: {err:#}");
                std::process::exit(1);
            }
        }
        Command::Validate { path, config_dir } => {
            let config_dir = resolve_config_dir(config_dir);
            let config = DaemonConfig::load(&config_dir).await?;
            let registry = Arc::new(
                ProjectRegistry::new(config_dir, config.default_projects_root.clone()).await?,
            );
            let report = registry.validate(&path).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::SimulateDeploy { project, command, config_dir } => {
            let config_dir = resolve_config_dir(config_dir);
            let log_path = config_dir.join("deploy_log.txt");
            if let Some(parent) = log_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
            let line = format!("{now} DEPLOY: {command}\n");
            append_line(&log_path, &line).await?;
            println!("appended DEPLOY line to {}", log_path.display());
        }
        Command::Status { config_dir } => {
            let config_dir = resolve_config_dir(config_dir);
            let addr = resolve_status_addr(&config_dir).await?;
            println!("query the running daemon at ws://{addr}/ws with {{\"command\":\"status\"}}");
        }
    }

    Ok(())
}

async fn serve(
    config_dir: Option<PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let config_dir = resolve_config_dir(config_dir);
    tokio::fs::create_dir_all(&config_dir)
        .await
        .context("cannot create user config directory")?;

    let logs_dir = deploybot_observability::canonical_logs_dir_from_root(&config_dir);
    let (_guard, logging_info) = init_process_logging(ProcessKind::Daemon, &logs_dir, 14)
        .context("cannot initialize logging")?;
    info!(?logging_info, "logging initialized");

    let mut config = DaemonConfig::load(&config_dir)
        .await
        .context("cannot load daemon config")?;
    if let Some(bind) = bind {
        config.bind_address = bind;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let registry = Arc::new(
        ProjectRegistry::new(config_dir.clone(), config.default_projects_root.clone())
            .await
            .context("cannot initialize project registry")?,
    );
    let migrated = registry.migrate_existing().await.unwrap_or(0);
    if migrated > 0 {
        info!(migrated, "backfilled project mappings from default projects root");
    }

    let analytics = Arc::new(AnalyticsStore::new(registry.clone()));
    let timers = Arc::new(TimerEngine::new());
    let notifications = Arc::new(NotificationDispatcher::new());
    let monitor = Arc::new(DeployMonitor::new());
    let bus = EventBus::new();

    let activity_log = Arc::new(ActivityLogSink::start(registry.clone(), move |message| {
        warn!("{message}");
    }));
    activity_log.push(ActivityEntry::system("DAEMON_START", "deploybot daemon starting"));

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        analytics.clone(),
        activity_log.clone(),
        timers.clone(),
        notifications.clone(),
        bus.clone(),
        config.clone(),
    ));

    let ticker_orchestrator = orchestrator.clone();
    timers.spawn_ticker(
        {
            let bus = bus.clone();
            move |update| {
                bus.publish_event(
                    deploybot_core::event_bus::EnvelopeType::Timer,
                    "timer.update",
                    serde_json::to_value(&update).unwrap_or_default(),
                );
            }
        },
        move |project| {
            let orchestrator = ticker_orchestrator.clone();
            tokio::spawn(async move {
                orchestrator.handle_timer_expired(&project).await;
            });
        },
    );

    let fallback_log = config_dir.join("deploy_log.txt");
    monitor.attach("__global__", fallback_log).await;

    let monitor_orchestrator = orchestrator.clone();
    monitor.start(
        move |event| {
            let orchestrator = monitor_orchestrator.clone();
            tokio::spawn(async move {
                orchestrator.handle_deploy_event(event).await;
            });
        },
        |warning| warn!("{warning}"),
    );

    let state = GatewayState {
        orchestrator,
        registry,
        analytics,
        timers,
        monitor,
    };

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .context("invalid bind address or port")?;
    let app = router(state);
    info!("serving deploybot gateway on ws://{addr}/ws");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("cannot bind gateway socket")?;
    axum::serve(listener, app).await.context("gateway server error")?;

    Ok(())
}

fn resolve_config_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = std::env::var("DEPLOYBOT_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("deploybot")
}

async fn append_line(path: &PathBuf, line: &str) -> anyhow::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

async fn resolve_status_addr(config_dir: &PathBuf) -> anyhow::Result<String> {
    let config = DaemonConfig::load(config_dir).await?;
    Ok(config.bind_addr())
}
