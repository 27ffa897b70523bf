use serde::{Deserialize, Serialize};

/// Kinds of media a download link may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Mp3,
    Video,
    Image,
}

impl MediaKind {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Video => "video/mp4",
            Self::Image => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Video => "mp4",
            Self::Image => "jpg",
        }
    }
}

/// Payload sealed into `/download?data=` links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadData {
    pub url: String,
    pub author: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
}

impl DownloadData {
    pub fn filename(&self) -> String {
        format!("{}.{}", self.author, self.kind.extension())
    }
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

pub fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_' | ' ') {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}

/// Author names reduced to `[A-Za-z0-9_]` for generated file names.
pub fn slug(value: &str) -> String {
    value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() {
                character
            } else {
                '_'
            }
        })
        .collect()
}
