use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dynapi::adapters::route_table::RouteTable;
use dynapi::adapters::AppState;
use dynapi::cli::Cli;
use dynapi::config::Settings;
use dynapi::persistence::{DataRepository, DefinitionRepository, MongoStore};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt::init();

    let settings = Settings::new_with_cli(&cli)?;
    info!(
        "Starting dynapi gateway on {}:{}",
        settings.server.host, settings.server.port
    );

    let store = Arc::new(MongoStore::connect(&settings.mongo).await?);
    if let Err(err) = store.ensure_indexes().await {
        warn!("Could not ensure definition indexes: {err}");
    }

    // Warm the route table; the server still starts (with empty routes)
    // when the initial load fails, and /api-generator/reload recovers.
    let routes = RouteTable::new();
    match store.list().await {
        Ok(definitions) => {
            let count = routes.replace_all(definitions).await;
            info!("Loaded {count} API definitions into the route table");
        }
        Err(err) => {
            error!("Failed to load initial API definitions: {err}. Starting with empty routes.");
        }
    }

    let definitions: Arc<dyn DefinitionRepository> = store.clone();
    let data: Arc<dyn DataRepository> = store;
    let state = AppState {
        definitions,
        data,
        routes,
        timeouts: settings.timeouts,
    };

    let app = dynapi::create_app(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
