//! clockind - The clockin background service
//!
//! This is the main entry point for the clockind service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization and project sync
//! - Tick coordinator (confirmation prompts and timeouts)
//! - Notification gateway (log-only when headless)

mod log_gateway;

use anyhow::{Context, Result};
use clap::Parser;
use clockin_config::{Config, load_config};
use clockin_core::{AttendanceService, TickCoordinator};
use clockin_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use clockin_util::{CLOCKIN_DATA_DIR_ENV, DATABASE_FILENAME, default_config_path};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::log_gateway::LogGateway;

/// clockind - Attendance confirmation scheduler
#[derive(Parser, Debug)]
#[command(name = "clockind")]
#[command(about = "Attendance confirmation and timeout scheduler", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/clockin/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set CLOCKIN_DATA_DIR env var)
    #[arg(short, long, env = CLOCKIN_DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

/// Main service state
struct Service {
    config: Config,
    store: Arc<dyn Store>,
    coordinator: Arc<TickCoordinator>,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        let config = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            project_count = config.projects.len(),
            "Configuration loaded"
        );

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| config.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        AttendanceService::new(store.clone())
            .sync_projects(&config.projects, config.service.default_locale)
            .context("Failed to sync configured projects")?;

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let coordinator = Arc::new(
            TickCoordinator::new(store.clone(), Arc::new(LogGateway::new()))
                .with_max_concurrent(config.service.max_concurrent_sessions),
        );

        Ok(Self {
            config,
            store,
            coordinator,
        })
    }

    async fn run_once(self) -> Result<()> {
        let report = self.coordinator.run_tick().await;
        info!(
            candidates = report.candidates,
            processed = report.processed,
            prompts_issued = report.prompts_issued,
            auto_ended = report.auto_ended,
            failures = report.failures,
            aborted = report.aborted,
            "Single tick complete"
        );
        self.shutdown();
        Ok(())
    }

    async fn run(self) -> Result<()> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let scheduler = self.coordinator.start(self.config.service.tick_interval);

        info!(
            tick_interval_secs = self.config.service.tick_interval.as_secs(),
            max_concurrent = self.config.service.max_concurrent_sessions,
            "Service running"
        );

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully");
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, shutting down gracefully");
            }
        }

        scheduler.stop().await;
        self.shutdown();
        Ok(())
    }

    fn shutdown(&self) {
        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to record service stop");
        }
        info!("Service stopped");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "clockind starting");

    if clockin_util::is_mock_time_active() {
        warn!(now = %clockin_util::now(), "Mock time is active");
    }

    let service = Service::new(&args)?;
    if args.once {
        service.run_once().await
    } else {
        service.run().await
    }
}
