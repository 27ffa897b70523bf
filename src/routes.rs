use std::{collections::HashSet, path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use tokio::{sync::Semaphore, time::Duration};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::{AppConfig, non_empty},
    error::ApiError,
    links::{LinkIssuer, TikTokResponse, build_response},
    media::{self, DownloadData},
    scraper::{HybridClient, is_supported_source_url},
    slideshow,
    token::LinkSealer,
};

const MEDIA_TIMEOUT_SECONDS: u64 = 60;
const X_FILENAME: HeaderName = HeaderName::from_static("x-filename");

#[derive(Clone)]
pub struct AppState {
    pub sealer: Arc<LinkSealer>,
    pub issuer: LinkIssuer,
    pub scraper: HybridClient,
    pub http_client: reqwest::Client,
    pub slideshow_semaphore: Arc<Semaphore>,
    pub temp_dir: PathBuf,
}

impl AppState {
    pub fn new(config: &AppConfig, http_client: reqwest::Client) -> Self {
        let sealer = Arc::new(LinkSealer::new(&config.encryption_key));
        Self {
            issuer: LinkIssuer::new(
                Arc::clone(&sealer),
                config.base_url.clone(),
                config.link_ttl_seconds,
            ),
            sealer,
            scraper: HybridClient::new(http_client.clone(), config.hybrid_api_url.clone()),
            http_client,
            slideshow_semaphore: Arc::new(Semaphore::new(config.max_concurrent_slideshows)),
            temp_dir: config.temp_dir.clone(),
        }
    }
}

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tiktok", post(resolve_post))
        .route("/download", get(download))
        .route("/download-slideshow", get(download_slideshow))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlideshowQuery {
    url: Option<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn resolve_post(
    State(state): State<AppState>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<TikTokResponse>, ApiError> {
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("URL parameter is required."));
    }
    if !is_supported_source_url(url) {
        return Err(ApiError::bad_request(
            "Only TikTok and Douyin URLs are supported.",
        ));
    }

    let post = state.scraper.fetch(url).await?;
    let response = build_response(&post, url, &state.issuer)?;
    Ok(Json(response))
}

async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let envelope = query
        .data
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(|| ApiError::bad_request("Encrypted data parameter is required."))?;

    let data: DownloadData = state.sealer.unseal(envelope)?;
    if data.url.trim().is_empty() || data.author.trim().is_empty() {
        return Err(ApiError::bad_request(
            "Invalid decrypted data: missing url or author.",
        ));
    }

    let upstream = state
        .http_client
        .get(&data.url)
        .timeout(Duration::from_secs(MEDIA_TIMEOUT_SECONDS))
        .send()
        .await
        .map_err(|error| {
            warn!("media source request failed: {error}");
            ApiError::bad_gateway("Failed to download from source.")
        })?;

    if upstream.status() != StatusCode::OK {
        return Err(ApiError::bad_gateway(format!(
            "Source returned error: {}",
            upstream.status().as_u16()
        )));
    }

    let filename = data.filename();
    let mut headers = attachment_headers(&filename, data.kind.content_type())?;
    if let Some(length) = upstream.content_length() {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }

    debug!(kind = ?data.kind, "streaming redeemed download");
    Ok((headers, Body::from_stream(upstream.bytes_stream())).into_response())
}

async fn download_slideshow(
    State(state): State<AppState>,
    Query(query): Query<SlideshowQuery>,
) -> Result<Response, ApiError> {
    let envelope = query
        .url
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(|| ApiError::bad_request("URL parameter is required."))?;

    let source_url: String = state.sealer.unseal(envelope)?;
    let post = state.scraper.fetch(&source_url).await?;
    if !post.is_image() {
        return Err(ApiError::bad_request("Only image posts are supported."));
    }

    let images = post.image_urls();
    if images.is_empty() {
        return Err(ApiError::bad_gateway("No images found."));
    }
    let audio = post
        .music_url()
        .ok_or_else(|| ApiError::bad_gateway("Could not find audio URL."))?;

    let _permit = state
        .slideshow_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::internal("Could not reserve slideshow capacity."))?;

    let job_dir = slideshow::create_job_dir(&state.temp_dir).await?;
    let rendered: Result<(Body, u64), ApiError> = async {
        let output = slideshow::render(&state.http_client, &images, audio, &job_dir).await?;
        let metadata = tokio::fs::metadata(&output).await.map_err(|error| {
            ApiError::internal(format!("Could not read rendered slideshow: {error}"))
        })?;
        let file = tokio::fs::File::open(&output).await.map_err(|error| {
            ApiError::internal(format!("Could not open rendered slideshow: {error}"))
        })?;
        Ok((Body::from_stream(ReaderStream::new(file)), metadata.len()))
    }
    .await;

    let (body, length) = match rendered {
        Ok(rendered) => rendered,
        Err(error) => {
            slideshow::cleanup_job(&job_dir).await;
            return Err(error);
        }
    };

    let filename = format!(
        "{}_{}.mp4",
        media::slug(post.author_nickname()),
        Utc::now().timestamp()
    );
    let mut headers = attachment_headers(&filename, "video/mp4")?;
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));

    slideshow::schedule_cleanup_job(job_dir);
    Ok((headers, body).into_response())
}

fn attachment_headers(filename: &str, content_type: &'static str) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&media::build_content_disposition(filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );
    headers.insert(
        X_FILENAME,
        HeaderValue::from_str(&urlencoding::encode(filename))
            .map_err(|_| ApiError::internal("Could not build the file name header."))?,
    );
    Ok(headers)
}

/// CORS for the issued links; an empty allow-list admits any origin.
pub fn build_cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, ApiError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION, X_FILENAME]);

    if allowed_origins.is_empty() {
        warn!("ALLOWED_ORIGINS is not set; accepting requests from any origin.");
        return Ok(layer.allow_origin(Any));
    }

    let normalized = allowed_origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!("CORS allow-list loaded with {} origin(s)", normalized.len());

    let allowed = Arc::new(normalized);
    Ok(layer.allow_origin(AllowOrigin::predicate(
        move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .ok()
                .and_then(normalize_origin)
                .is_some_and(|value| allowed.contains(&value))
        },
    )))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}
