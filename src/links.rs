//! Capability URLs handed to clients, and the `/tiktok` response that carries them.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use tracing::warn;

use crate::{
    error::ApiError,
    media::{DownloadData, MediaKind},
    scraper::{PostData, Statistics},
    token::{LinkSealer, TokenError},
};

/// Seals payloads into `/download` and `/download-slideshow` URLs.
#[derive(Debug, Clone)]
pub struct LinkIssuer {
    sealer: Arc<LinkSealer>,
    base_url: String,
    ttl_seconds: u64,
}

impl LinkIssuer {
    pub fn new(sealer: Arc<LinkSealer>, base_url: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            sealer,
            base_url: base_url.into(),
            ttl_seconds,
        }
    }

    pub fn download_link(
        &self,
        url: &str,
        author: &str,
        kind: MediaKind,
    ) -> Result<String, TokenError> {
        let data = DownloadData {
            url: url.to_string(),
            author: author.to_string(),
            kind,
        };
        let envelope = self.sealer.seal(&data, self.ttl_seconds)?;
        Ok(format!("{}/download?data={envelope}", self.base_url))
    }

    /// The sealed payload here is the bare source page URL.
    pub fn slideshow_link(&self, source_url: &str) -> Result<String, TokenError> {
        let envelope = self.sealer.seal(source_url, self.ttl_seconds)?;
        Ok(format!("{}/download-slideshow?url={envelope}", self.base_url))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    /// Single video; links tunnel through `/download`.
    Tunnel,
    /// Photo post; the client picks images.
    Picker,
}

#[derive(Debug, Serialize)]
pub struct PhotoItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct AuthorBody {
    pub nickname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LinkValue {
    Single(String),
    Many(Vec<String>),
}

#[derive(Debug, Serialize)]
pub struct TikTokResponse {
    pub status: PostStatus,
    pub photos: Vec<PhotoItem>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub statistics: Statistics,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub artist: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cover: String,
    pub duration: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub audio: String,
    pub music_duration: u64,
    pub author: AuthorBody,
    pub download_link: BTreeMap<&'static str, LinkValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_slideshow_link: Option<String>,
}

pub fn build_response(
    post: &PostData,
    source_url: &str,
    issuer: &LinkIssuer,
) -> Result<TikTokResponse, ApiError> {
    let nickname = post.author_nickname().to_string();
    let description = post.desc.clone().unwrap_or_default();
    let music_url = post.music_url().map(ToString::to_string);

    if music_url.is_none() {
        warn!("no music data found for {source_url}");
    }

    let mut download_link = BTreeMap::new();
    if let Some(url) = music_url.as_deref() {
        let link = issuer.download_link(url, &nickname, MediaKind::Mp3)?;
        download_link.insert("mp3", LinkValue::Single(link));
    }

    let mut response = TikTokResponse {
        status: PostStatus::Tunnel,
        photos: Vec::new(),
        title: description.clone(),
        description,
        statistics: post.statistics.clone(),
        artist: nickname.clone(),
        cover: post.cover_data.cover.first().unwrap_or_default().to_string(),
        duration: whole_seconds(post.duration),
        audio: music_url.unwrap_or_default(),
        music_duration: whole_seconds(post.music.as_ref().and_then(|music| music.duration)),
        author: AuthorBody {
            nickname: nickname.clone(),
            signature: post.author.signature.clone().unwrap_or_default(),
            avatar: post.author.avatar_thumb.first().unwrap_or_default().to_string(),
        },
        download_link,
        download_slideshow_link: None,
    };

    if post.is_image() {
        let images = post.image_urls();
        if images.is_empty() {
            return Err(ApiError::bad_gateway("No images found in image data."));
        }

        let mut image_links = Vec::with_capacity(images.len());
        for url in &images {
            response.photos.push(PhotoItem {
                kind: "photo",
                url: (*url).to_string(),
            });
            image_links.push(issuer.download_link(url, &nickname, MediaKind::Image)?);
        }

        response
            .download_link
            .insert("no_watermark", LinkValue::Many(image_links));
        response.download_slideshow_link = Some(issuer.slideshow_link(source_url)?);
        response.status = PostStatus::Picker;
    } else {
        let Some(videos) = post.video_data.as_ref() else {
            return Err(ApiError::bad_gateway("Video data not found."));
        };

        let variants = [
            ("watermark", &videos.wm_video_url),
            ("watermark_hd", &videos.wm_video_url_hq),
            ("no_watermark", &videos.nwm_video_url),
            ("no_watermark_hd", &videos.nwm_video_url_hq),
        ];

        let mut found = false;
        for (key, url) in variants {
            let Some(url) = url.as_deref().filter(|url| !url.is_empty()) else {
                continue;
            };
            let link = issuer.download_link(url, &nickname, MediaKind::Video)?;
            response.download_link.insert(key, LinkValue::Single(link));
            found = true;
        }

        if !found {
            return Err(ApiError::bad_gateway("No valid video URLs found."));
        }
    }

    Ok(response)
}

fn whole_seconds(value: Option<f64>) -> u64 {
    value
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .map(|seconds| seconds as u64)
        .unwrap_or(0)
}
