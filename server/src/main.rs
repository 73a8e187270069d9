use std::sync::Arc;

use tokio::net::TcpListener;

use telecare_server::broker::Broker;
use telecare_server::config::{generate_config_template, Config};
use telecare_server::db;
use telecare_server::routes;
use telecare_server::state::AppState;
use telecare_server::store::SqliteMessageStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "telecare_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "telecare_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!(
        "Telecare relay server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize the SQLite message store
    let db = db::init_db(&config.data_dir)?;
    let store = Arc::new(SqliteMessageStore::new(db));

    // Construct the broker once and inject it into the transport adapter
    let broker = Arc::new(Broker::new(store));

    let app_state = AppState {
        broker: broker.clone(),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broker))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then close every live connection before the server stops.
async fn shutdown_signal(broker: Arc<Broker>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    broker.shutdown();
}
