use tokio::{net::TcpListener, time::Duration};
use tracing::info;
use tt_downloader::{
    ApiError, AppConfig, AppState, build_cors_layer, build_router, slideshow,
};

const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tt_downloader=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = AppConfig::from_env()?;

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .map_err(|error| ApiError::internal(format!("Could not create temp directory: {error}")))?;
    slideshow::cleanup_stale_jobs(&config.temp_dir, slideshow::STALE_JOB_SECONDS).await;
    slideshow::spawn_stale_job_sweeper(
        config.temp_dir.clone(),
        Duration::from_secs(slideshow::STALE_SWEEP_INTERVAL_SECONDS),
        slideshow::STALE_JOB_SECONDS,
    );

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS))
        .build()
        .map_err(|error| ApiError::internal(format!("Could not build HTTP client: {error}")))?;

    let cors = build_cors_layer(&config.allowed_origins)?;
    let app = build_router(AppState::new(&config, http_client), cors);

    info!("Base URL: {}", config.base_url);
    info!("Temp directory: {:?}", config.temp_dir);
    info!("Hybrid API URL: {}", config.hybrid_api_url);
    info!("Link TTL: {}s", config.link_ttl_seconds);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
