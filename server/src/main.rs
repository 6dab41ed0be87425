use config::{Config, Environment, File};
use relay::{RelayConfig, StreamRelay};
use server::{AppState, get_app};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> anyhow::Result<(String, u16, RelayConfig)> {
    let settings = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::with_prefix("RELAY"))
        .build()?;

    let host: String = settings
        .get("host")
        .unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = settings.get("port").unwrap_or(3000);

    let mut relay_config = RelayConfig::from_env();
    if let Ok(endpoint) = settings.get::<String>("endpoint") {
        relay_config = relay_config.endpoint(endpoint);
    }
    if let Ok(max_frame_bytes) = settings.get::<usize>("max_frame_bytes") {
        relay_config = relay_config.max_frame_bytes(max_frame_bytes);
    }
    if let Ok(secs) = settings.get::<u64>("connect_timeout_secs") {
        relay_config = relay_config.connect_timeout(Duration::from_secs(secs));
    }

    if relay_config.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set, upstream will reject requests");
    }

    Ok((host, port, relay_config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("Initializing stream relay server");

    let (host, port, relay_config) = load_config()?;
    info!("Starting server on {}:{}", host, port);

    let relay = StreamRelay::new(relay_config)?;
    info!(
        "Relaying to {} (max frame: {} bytes)",
        relay.config().endpoint,
        relay.config().max_frame_bytes
    );

    let state = Arc::new(AppState {
        relay: Arc::new(relay),
    });
    let app = get_app(state);

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    info!("Server started successfully, listening for requests");

    axum::serve(listener, app).await?;

    Ok(())
}
