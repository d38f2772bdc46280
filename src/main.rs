//! Investor <-> admin messaging service

use investor_messaging::api;
use investor_messaging::config::AppConfig;
use investor_messaging::infrastructure::database::DatabaseConnection;
use investor_messaging::service_collection;

use anyhow::anyhow;
use axum::http::{HeaderValue, Method};
use di_axum::RouterServiceProviderExtensions;
use log::{info, warn};
use tokio::runtime::{Builder, Runtime};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env()?;
    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(web_server_task(config))
}

async fn web_server_task(config: AppConfig) -> anyhow::Result<()> {
    let connection = DatabaseConnection::connect(&config).await?;
    let bind_address = config.bind_address.clone();
    let cors = cors_layer(&config.cors_allowed_origins);

    let provider = service_collection(config, connection)
        .build_provider()
        .map_err(|e| anyhow!("invalid service configuration: {e}"))?;

    let app = api::router()
        .layer(ServiceBuilder::new().layer(cors))
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Shutting down...");

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(origins)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("could not listen for shutdown signal: {err}");
    }
}
