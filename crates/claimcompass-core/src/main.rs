use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use claimcompass_core::analysis::analyzer_from_config;
use claimcompass_core::{router, AppState, Config};
use claimcompass_tools::fetch::{ImageFetcher, FETCH_TIMEOUT};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "claimcompass=debug,claimcompass_core=debug,claimcompass_tools=debug,tower_http=info,info"
                    .into()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ClaimCompass starting up...");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Configuration loaded");
    info!("  OpenAI API: {}", config.openai_api_url);
    info!("  Model: {}", config.openai_model);
    info!("  Analysis enabled: {}", config.analysis_enabled());
    info!("  Frontend: {}", config.frontend_dir.display());

    let analyzer = analyzer_from_config(&config)?;
    let fetcher = ImageFetcher::with_limits(FETCH_TIMEOUT, config.max_upload_bytes)?;
    let state = AppState::new(
        analyzer,
        fetcher,
        config.frontend_dir.clone(),
        config.max_upload_bytes,
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    Ok(())
}
