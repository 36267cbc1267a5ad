use portico::config::Config;
use portico::domain::auth::TokenVerifier;
use portico::domain::call::repository::CallRepository;
use portico::domain::call::session::CallSessionManager;
use portico::domain::notify::{CallNotifier, LogNotifier};
use portico::domain::registry::ConnectionRegistry;
use portico::interface::api::{
    build_router, init_metrics, update_active_calls, update_connections, AppState, SignalingState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use portico::infrastructure::persistence::{
    create_pool, run_migrations, DatabaseConfig, PgCallRepository,
};
#[cfg(not(feature = "postgres"))]
use portico::infrastructure::persistence::InMemoryCallRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Portico intercom call server");

    let config = Config::from_env();

    let prometheus_handle = init_metrics();

    #[cfg(feature = "postgres")]
    let repository: Arc<dyn CallRepository> = {
        let db_config = DatabaseConfig {
            url: config.database.url.clone(),
            ..Default::default()
        };
        let pool = create_pool(&db_config).await?;
        run_migrations(&pool).await?;
        Arc::new(PgCallRepository::new(pool))
    };

    #[cfg(not(feature = "postgres"))]
    let repository: Arc<dyn CallRepository> = {
        info!("Running with the in-memory call store; records do not survive a restart");
        Arc::new(InMemoryCallRepository::new())
    };

    let sessions = Arc::new(CallSessionManager::new(repository));
    let registry = Arc::new(ConnectionRegistry::new());
    let notifier: Arc<dyn CallNotifier> = Arc::new(LogNotifier);
    let verifier = TokenVerifier::new(config.auth.token_secret.clone().into_bytes());

    let signaling = Arc::new(SignalingState::new(
        sessions.clone(),
        registry.clone(),
        notifier,
        verifier,
        Duration::from_secs(config.call.ring_timeout_secs),
    ));

    // Gauge updater task
    {
        let sessions = sessions.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            loop {
                if let Ok(active) = sessions.active_call_count().await {
                    update_active_calls(active);
                }
                let stats = registry.statistics();
                update_connections(stats.online_users, stats.connected_visitors);

                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
    }

    let state = AppState {
        sessions,
        registry: registry.clone(),
        signaling,
    };
    let app = build_router(state, prometheus_handle);

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(
        "Listening on {} (ring timeout {}s)",
        bind, config.call.ring_timeout_secs
    );

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("API server failed");
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let drained = registry.drain();
    info!("Dropped {} live connections", drained);
    server_handle.abort();

    Ok(())
}
