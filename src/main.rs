use anyhow::Context;
use live_gateway::{init_logging, serve, Gateway, GatewayConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ist optional
    let _ = dotenvy::dotenv();
    init_logging();

    let config = GatewayConfig::from_env().context("Invalid gateway configuration")?;
    if config.api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set, Gemini sessions will fail");
    }
    tracing::info!("Starting Live Gateway: {:?}", config);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl+C, shutting down");
                signal.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    serve(Gateway::new(config), listener, shutdown).await
}
