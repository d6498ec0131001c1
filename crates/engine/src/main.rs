//! Drip Engine Server
//!
//! Loads rule documents, composes the engine and serves the HTTP API while a
//! background poller admits queued triggers and resumes due delays.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drip_actions::senders::{EmailSender, LogSender, RelayConfig, SmsSender, WebhookSender};
use drip_actions::ActionRegistry;
use drip_engine::{
    clock::SystemClock,
    config::{AppConfig, DatabaseConfig, EngineConfig, SenderConfig, StoreBackend},
    db::{create_pool, init_schema, DbPool},
    engine::{executors::shared_flows_from, ExecutorRegistry, WorkflowEngine},
    handlers,
    poller::Poller,
    rules::{validate_rule_set, FileRuleSource, RuleSource},
    state::AppState,
    store::{ExecutionStore, MemoryStore, PgStore},
    template::TemplateRenderer,
    triggers::TriggerRegistry,
};

/// Initialize tracing/logging.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,drip_engine=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Register the outbound senders. Email and SMS log instead of sending when
/// no relay endpoint is configured.
fn build_actions(senders: &SenderConfig, engine: &EngineConfig) -> ActionRegistry {
    let relay = |endpoint: &str| {
        let config = RelayConfig::new(endpoint).with_timeout(senders.timeout());
        match senders.api_token {
            Some(ref token) => config.with_token(token.clone()),
            None => config,
        }
    };

    let mut actions = ActionRegistry::new().with_timeout(engine.action_timeout());
    actions.register(WebhookSender::new(senders.timeout()));
    actions.register(LogSender);

    match senders.email_endpoint {
        Some(ref endpoint) => actions.register(EmailSender::new(relay(endpoint))),
        None => {
            tracing::warn!("DRIP_SENDER_EMAIL_ENDPOINT not set, send_email will only log");
            actions.register_named("send_email", LogSender);
        }
    }
    match senders.sms_endpoint {
        Some(ref endpoint) => actions.register(SmsSender::new(relay(endpoint))),
        None => {
            tracing::warn!("DRIP_SENDER_SMS_ENDPOINT not set, send_sms will only log");
            actions.register_named("send_sms", LogSender);
        }
    }

    tracing::info!(actions = ?actions.list(), "Action senders registered");
    actions
}

async fn open_store(
    app_config: &AppConfig,
) -> anyhow::Result<(Arc<dyn ExecutionStore>, Option<DbPool>)> {
    match app_config.store {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store, executions will not survive a restart");
            Ok((Arc::new(MemoryStore::new()), None))
        }
        StoreBackend::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });
            tracing::info!(database = %db_config.redacted_url(), "Connecting to execution store");
            let pool = create_pool(&db_config).await?;
            init_schema(&pool).await?;
            Ok((Arc::new(PgStore::new(pool.clone())), Some(pool)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let app_config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Failed to load app config ({}), using defaults", e);
        AppConfig::default()
    });

    init_tracing(app_config.log_json);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Drip Engine");

    let engine_config = EngineConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load engine config, using defaults");
        EngineConfig::default()
    });
    let sender_config = SenderConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load sender config, using defaults");
        SenderConfig::default()
    });

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        store = ?app_config.store,
        rules_dir = %app_config.rules_dir.display(),
        poll_interval_secs = engine_config.poll_interval_secs,
        max_retries = engine_config.max_retries,
        "Configuration loaded"
    );

    // Rules: triggers and shared flows are fixed for the process lifetime,
    // rule flows are re-read on every admission.
    let rules = Arc::new(FileRuleSource::new(app_config.rules_dir.clone()));
    let documents = rules.load_all().await?;
    validate_rule_set(&documents)?;
    let triggers = TriggerRegistry::from_rules(&documents)?;
    tracing::info!(
        documents = documents.len(),
        triggers = ?triggers.list(),
        "Rules loaded"
    );

    let executors = ExecutorRegistry::standard(
        Arc::new(build_actions(&sender_config, &engine_config)),
        Arc::new(shared_flows_from(&documents)),
        Arc::new(TemplateRenderer::new()),
    );

    let (store, db_pool) = open_store(&app_config).await?;

    let engine = Arc::new(WorkflowEngine::new(
        store,
        Arc::new(executors),
        triggers,
        rules,
        Arc::new(SystemClock),
        engine_config,
    ));

    // Background poller
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = Poller::new(engine.clone());
    let poller_handle = tokio::spawn(async move { poller.run(shutdown_rx).await });

    let state = AppState::new(engine, db_pool, app_config.clone());
    let app = handlers::router(state);

    // Bind to address
    let addr: SocketAddr = app_config.bind_address().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    if let Err(e) = poller_handle.await {
        tracing::error!(error = %e, "Poller task ended abnormally");
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
