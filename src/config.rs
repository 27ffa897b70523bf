use std::path::PathBuf;

use crate::error::ApiError;

pub const DEFAULT_LINK_TTL_SECONDS: u64 = 360;
const DEFAULT_MAX_CONCURRENT_SLIDESHOWS: usize = 2;
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3021";
const DEFAULT_HYBRID_API_URL: &str = "http://douyin_tiktok_download_api:8000/api/hybrid/video_data";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3021";

#[derive(Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub encryption_key: String,
    pub hybrid_api_url: String,
    pub bind_addr: String,
    pub temp_dir: PathBuf,
    pub link_ttl_seconds: u64,
    pub max_concurrent_slideshows: usize,
    pub allowed_origins: Vec<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("base_url", &self.base_url)
            .field("encryption_key", &"<redacted>")
            .field("hybrid_api_url", &self.hybrid_api_url)
            .field("bind_addr", &self.bind_addr)
            .field("temp_dir", &self.temp_dir)
            .field("link_ttl_seconds", &self.link_ttl_seconds)
            .field("max_concurrent_slideshows", &self.max_concurrent_slideshows)
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };

        let encryption_key = lookup("ENCRYPTION_KEY")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ApiError::internal("ENCRYPTION_KEY must be set to a non-empty secret.")
            })?;

        let base_url = read("BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let hybrid_api_url =
            read("DOUYIN_API_URL").unwrap_or_else(|| DEFAULT_HYBRID_API_URL.to_string());

        let link_ttl_seconds = read("LINK_TTL_SECONDS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_LINK_TTL_SECONDS);

        let max_concurrent_slideshows = read("MAX_CONCURRENT_SLIDESHOWS")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_SLIDESHOWS);

        let allowed_origins = read("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(Self {
            base_url,
            encryption_key,
            hybrid_api_url,
            bind_addr: resolve_bind_addr(&read),
            temp_dir: read("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./temp")),
            link_ttl_seconds,
            max_concurrent_slideshows,
            allowed_origins,
        })
    }
}

fn resolve_bind_addr(read: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(configured) = read("APP_ADDR") {
        return configured;
    }

    if let Some(port) = read("PORT").and_then(|value| value.parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
