use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use request_syncer::backend::{BackendClient, TokenManager};
use request_syncer::config::{self, AppConfig};
use request_syncer::ledger::{LedgerStore, SqliteLedgerStore};
use request_syncer::notifications::{
    LogNotifier, NotificationDispatcher, Notifier, TelegramNotifier,
};
use request_syncer::report::DailyReporter;
use request_syncer::request_source::{SeerrClient, TmdbClient};
use request_syncer::sync::{PipelineSettings, RetrySweeper, SyncPipeline};
use request_syncer::tracker::{PushListener, TrackingReconciler};

/// Time given to in-flight notification deliveries before the process exits.
const NOTIFY_GRACE: Duration = Duration::from_secs(3);

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(path_buf))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// One sync pass and one tracking check, then exit
    Once,
    /// Run every loop until Ctrl+C
    Daemon,
}

#[derive(Parser, Debug)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    #[clap(long, value_enum, default_value = "once")]
    pub mode: RunMode,

    /// Log subscribe calls instead of sending them.
    #[clap(long)]
    pub dry_run: bool,

    /// Path to the SQLite ledger file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Base URL of the request-management front end.
    #[clap(long)]
    pub source_url: Option<String>,

    /// Base URL of the acquisition backend.
    #[clap(long)]
    pub backend_url: Option<String>,

    #[clap(long)]
    pub backend_username: Option<String>,
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Convert CLI args and credential env vars to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_path: args.db_path.clone(),
            dry_run: args.dry_run,
            source_url: args.source_url.clone(),
            source_api_key: env_secret("SOURCE_API_KEY"),
            backend_url: args.backend_url.clone(),
            backend_username: args.backend_username.clone(),
            backend_password: env_secret("BACKEND_PASSWORD"),
            telegram_bot_token: env_secret("TELEGRAM_BOT_TOKEN"),
            tmdb_api_key: env_secret("TMDB_API_KEY"),
        }
    }
}

fn build_dispatcher(app_config: &AppConfig) -> Result<NotificationDispatcher> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    if let (true, Some(token)) = (
        app_config.notify.telegram_enabled(),
        app_config.notify.telegram_bot_token.clone(),
    ) {
        notifiers.push(Arc::new(TelegramNotifier::new(
            app_config.notify.telegram_api_url.clone(),
            token,
            app_config.notify.telegram_chat_ids.clone(),
        )?));
    }
    let dispatcher = NotificationDispatcher::new(notifiers);
    info!("Notification channels: {:?}", dispatcher.channel_names());
    Ok(dispatcher)
}

/// Periodically replace the backend token ahead of its expiry.
async fn run_token_refresher(tokens: Arc<TokenManager>, every: Duration, shutdown: CancellationToken) {
    info!("Token refresher starting (interval={}h)", every.as_secs() / 3600);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = shutdown.cancelled() => break,
        }
        match tokens.refresh_token().await {
            Ok(_) => info!("Backend token refreshed"),
            Err(e) => warn!("Scheduled token refresh failed: {}", e),
        }
    }
    info!("Token refresher stopped");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    info!(
        "request-syncer {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;
    app_config.log_summary();

    info!("Opening ledger at {:?}", app_config.db_path);
    let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedgerStore::new(&app_config.db_path)?);

    let notifier = build_dispatcher(&app_config)?;
    let backend = Arc::new(BackendClient::new(&app_config.backend)?);
    let source = Arc::new(SeerrClient::new(
        app_config.source.base_url.clone(),
        app_config.source.api_key.clone(),
        app_config.source.request_timeout_secs,
    )?);

    let mut pipeline = SyncPipeline::new(
        source,
        backend.clone(),
        ledger.clone(),
        notifier.clone(),
        PipelineSettings {
            page_size: app_config.source.page_size,
            tv_mode: app_config.sync.tv_mode,
        },
    );
    if let Some(key) = &app_config.notify.tmdb_api_key {
        pipeline = pipeline.with_poster_lookup(Arc::new(TmdbClient::new(
            app_config.notify.tmdb_base_url.clone(),
            key.clone(),
        )?));
    }

    let reconciler = TrackingReconciler::new(
        backend.clone(),
        ledger.clone(),
        notifier.clone(),
        app_config.tracker.history_page_size,
    );

    match cli_args.mode {
        RunMode::Once => run_once(&app_config, &pipeline, &reconciler, ledger.as_ref()).await,
        RunMode::Daemon => {
            run_daemon(app_config, pipeline, reconciler, backend, ledger, notifier).await
        }
    }
}

async fn run_once(
    app_config: &AppConfig,
    pipeline: &SyncPipeline,
    reconciler: &TrackingReconciler,
    ledger: &dyn LedgerStore,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let report = pipeline.sync_once(&cancel).await?;
    println!(
        "Sync: fetched={} upserted={} skipped={} subscribed={} already_exists={} failed={}",
        report.fetched,
        report.upserted,
        report.skipped,
        report.subscribed,
        report.already_exists,
        report.failed
    );

    if app_config.tracker.enabled {
        let tracked = reconciler.check_once(&cancel).await?;
        println!(
            "Tracking: checked={} download_started={} transferred={} failed={}",
            tracked.checked, tracked.download_started, tracked.transferred, tracked.failed
        );
    }

    let stats = ledger.get_stats()?;
    println!(
        "Ledger: total={} pending={} synced={} failed={}",
        stats.total, stats.pending, stats.synced, stats.failed
    );
    let tracking = ledger.get_tracking_stats()?;
    println!(
        "Tracking records: subscribed={} downloading={} downloaded={} transferred={} failed={}",
        tracking.subscribed,
        tracking.downloading,
        tracking.downloaded,
        tracking.transferred,
        tracking.failed
    );

    tokio::time::sleep(NOTIFY_GRACE).await;
    Ok(())
}

async fn run_daemon(
    app_config: AppConfig,
    pipeline: SyncPipeline,
    reconciler: TrackingReconciler,
    backend: Arc<BackendClient>,
    ledger: Arc<dyn LedgerStore>,
    notifier: NotificationDispatcher,
) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    let sync_interval = Duration::from_secs(app_config.sync.interval_secs);
    let token = shutdown_token.child_token();
    tasks.spawn(async move { pipeline.run(sync_interval, token).await });

    if app_config.tracker.enabled {
        let interval = Duration::from_secs(app_config.tracker.interval_secs);
        let token = shutdown_token.child_token();
        tasks.spawn(async move { reconciler.run(interval, token).await });

        if app_config.tracker.push_enabled {
            let listener = PushListener::new(
                &backend,
                notifier.clone(),
                app_config.tracker.push_reconnect_secs,
            )?;
            let token = shutdown_token.child_token();
            tasks.spawn(async move { listener.run(token).await });
        }
    } else {
        info!("Tracking disabled");
    }

    if app_config.report.enabled {
        let reporter = DailyReporter::new(ledger.clone(), notifier.clone(), app_config.report.time);
        let token = shutdown_token.child_token();
        tasks.spawn(async move { reporter.run(token).await });
    }

    if app_config.retry.enabled {
        let sweeper = RetrySweeper::new(
            ledger.clone(),
            backend.clone(),
            notifier.clone(),
            app_config.retry.clone(),
        );
        let token = shutdown_token.child_token();
        tasks.spawn(async move { sweeper.run(token).await });
    }

    let refresh_every = Duration::from_secs(app_config.backend.token_refresh_hours * 3600);
    let tokens = backend.token_manager();
    let token = shutdown_token.child_token();
    tasks.spawn(async move { run_token_refresher(tokens, refresh_every, token).await });

    info!("Daemon running with {} tasks", tasks.len());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        Some(result) = tasks.join_next() => {
            if let Err(e) = result {
                error!("Background task ended unexpectedly: {}", e);
            }
        }
    }
    shutdown_token.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("Background task failed during shutdown: {}", e);
        }
    }
    info!("Shutdown complete");
    Ok(())
}
