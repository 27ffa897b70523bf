//! Client for the hybrid TikTok/Douyin scraper API.
//!
//! Only the fields the link issuer and the slideshow job read are modelled;
//! everything else in the upstream document is ignored.

use serde::{Deserialize, Deserializer, Serialize};
use tokio::time::Duration;
use tracing::warn;
use url::Url;

use crate::error::ApiError;

const SCRAPER_TIMEOUT_SECONDS: u64 = 30;

const SUPPORTED_DOMAINS: [&str; 4] = ["tiktok.com", "douyin.com", "iesdouyin.com", "tiktokv.com"];

#[derive(Debug, Deserialize)]
struct HybridResponse {
    data: PostData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PostData {
    #[serde(rename = "type")]
    pub post_type: Option<String>,
    pub desc: Option<String>,
    pub duration: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub author: Author,
    #[serde(deserialize_with = "null_as_default")]
    pub statistics: Statistics,
    pub music: Option<Music>,
    pub video_data: Option<VideoUrls>,
    pub image_data: Option<ImageData>,
    #[serde(deserialize_with = "null_as_default")]
    pub cover_data: CoverData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Author {
    pub nickname: Option<String>,
    pub signature: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub avatar_thumb: UrlList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UrlList {
    #[serde(deserialize_with = "null_as_default")]
    pub url_list: Vec<String>,
    pub url: Option<String>,
    pub uri: Option<String>,
}

impl UrlList {
    pub fn first(&self) -> Option<&str> {
        self.url_list.iter().map(String::as_str).find(|url| !url.is_empty())
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    #[serde(deserialize_with = "null_as_default")]
    pub repost_count: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub comment_count: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub digg_count: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub play_count: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Music {
    #[serde(deserialize_with = "null_as_default")]
    pub play_url: UrlList,
    pub duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VideoUrls {
    pub wm_video_url: Option<String>,
    #[serde(rename = "wm_video_url_HQ")]
    pub wm_video_url_hq: Option<String>,
    pub nwm_video_url: Option<String>,
    #[serde(rename = "nwm_video_url_HQ")]
    pub nwm_video_url_hq: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImageData {
    #[serde(deserialize_with = "null_as_default")]
    pub no_watermark_image_list: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CoverData {
    #[serde(deserialize_with = "null_as_default")]
    pub cover: UrlList,
}

/// The scraper sends `null` for sub-objects and counters it could not fill.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl PostData {
    pub fn is_image(&self) -> bool {
        self.post_type.as_deref() == Some("image")
    }

    pub fn author_nickname(&self) -> &str {
        self.author
            .nickname
            .as_deref()
            .filter(|nickname| !nickname.trim().is_empty())
            .unwrap_or("Unknown")
    }

    /// Playable audio URL: the first CDN entry, then `url`, then an absolute `uri`.
    pub fn music_url(&self) -> Option<&str> {
        let play_url = &self.music.as_ref()?.play_url;
        play_url
            .first()
            .or(play_url.url.as_deref().filter(|url| !url.is_empty()))
            .or(play_url
                .uri
                .as_deref()
                .filter(|uri| uri.starts_with("http://") || uri.starts_with("https://")))
    }

    pub fn image_urls(&self) -> Vec<&str> {
        self.image_data
            .iter()
            .flat_map(|data| data.no_watermark_image_list.iter())
            .map(String::as_str)
            .filter(|url| !url.is_empty())
            .collect()
    }
}

#[derive(Clone)]
pub struct HybridClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HybridClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub async fn fetch(&self, source_url: &str) -> Result<PostData, ApiError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("url", source_url), ("minimal", "true")])
            .timeout(Duration::from_secs(SCRAPER_TIMEOUT_SECONDS))
            .send()
            .await
            .map_err(|error| {
                warn!("scraper request failed: {error}");
                ApiError::bad_gateway("Failed to fetch data from the scraper API.")
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::bad_gateway(format!(
                "External API returned error: {}",
                status.as_u16()
            )));
        }

        let body: HybridResponse = response.json().await.map_err(|error| {
            warn!("scraper response could not be parsed: {error}");
            ApiError::bad_gateway("Error parsing scraper response.")
        })?;

        Ok(body.data)
    }
}

pub fn is_supported_source_url(input: &str) -> bool {
    let Ok(parsed) = Url::parse(input) else {
        return false;
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
        return false;
    };

    SUPPORTED_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}
