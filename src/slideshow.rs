//! Slideshow jobs for photo posts: fetch the images and the soundtrack into a
//! job directory and hand them to `ffmpeg`.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::{
    io::AsyncWriteExt,
    process::Command,
    task::{JoinHandle, JoinSet},
    time::{Duration, Instant, MissedTickBehavior, interval_at, timeout},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;

const FRAME_SECONDS: usize = 3;
const FRAME_WIDTH: u32 = 1080;
const FRAME_HEIGHT: u32 = 1920;
const FFMPEG_TIMEOUT_SECONDS: u64 = 5 * 60;
const FETCH_TIMEOUT_SECONDS: u64 = 60;
const JOB_RETENTION_SECONDS: u64 = 5 * 60;
pub const STALE_JOB_SECONDS: u64 = 60 * 60;
pub const STALE_SWEEP_INTERVAL_SECONDS: u64 = 10 * 60;

pub async fn create_job_dir(temp_dir: &Path) -> Result<PathBuf, ApiError> {
    let job_dir = temp_dir.join(Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&job_dir).await.map_err(|error| {
        ApiError::internal(format!("Could not create slideshow job directory: {error}"))
    })?;
    Ok(job_dir)
}

/// Image paths come back in input order regardless of which download finishes first.
pub async fn fetch_inputs(
    http: &reqwest::Client,
    image_urls: &[&str],
    audio_url: &str,
    job_dir: &Path,
) -> Result<(Vec<PathBuf>, PathBuf), ApiError> {
    let image_paths: Vec<PathBuf> = (0..image_urls.len())
        .map(|index| job_dir.join(format!("image_{index}.jpg")))
        .collect();
    let audio_path = job_dir.join("audio.mp3");

    let mut downloads = JoinSet::new();
    let targets = image_urls
        .iter()
        .map(|url| url.to_string())
        .zip(image_paths.iter().cloned())
        .chain(std::iter::once((audio_url.to_string(), audio_path.clone())));

    for (url, path) in targets {
        let http = http.clone();
        downloads.spawn(async move { download_file(&http, &url, &path).await });
    }

    while let Some(joined) = downloads.join_next().await {
        let result = joined
            .map_err(|error| ApiError::internal(format!("Download task failed: {error}")))?;
        if let Err(error) = result {
            downloads.abort_all();
            while downloads.join_next().await.is_some() {}
            return Err(error);
        }
    }

    Ok((image_paths, audio_path))
}

pub async fn download_file(http: &reqwest::Client, url: &str, path: &Path) -> Result<(), ApiError> {
    let mut response = http
        .get(url)
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECONDS))
        .send()
        .await
        .map_err(|error| {
            warn!("slideshow asset request failed: {error}");
            ApiError::bad_gateway("Failed to download slideshow media.")
        })?;

    if !response.status().is_success() {
        return Err(ApiError::bad_gateway(format!(
            "Media source returned error: {}",
            response.status().as_u16()
        )));
    }

    let mut file = tokio::fs::File::create(path).await.map_err(|error| {
        ApiError::internal(format!("Could not create temporary media file: {error}"))
    })?;

    while let Some(chunk) = response.chunk().await.map_err(|error| {
        warn!("slideshow asset stream failed: {error}");
        ApiError::bad_gateway("Failed to download slideshow media.")
    })? {
        file.write_all(&chunk).await.map_err(|error| {
            ApiError::internal(format!("Could not write temporary media file: {error}"))
        })?;
    }

    file.flush()
        .await
        .map_err(|error| ApiError::internal(format!("Could not write temporary media file: {error}")))
}

/// One still per image, scaled and padded to portrait 1080x1920, concatenated,
/// with the looping soundtrack trimmed to the video length.
pub fn build_ffmpeg_args(images: &[PathBuf], audio: &Path, output: &Path) -> Vec<String> {
    let mut args = vec!["-y".to_string()];

    for image in images {
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-t".to_string(),
            FRAME_SECONDS.to_string(),
            "-i".to_string(),
            image.to_string_lossy().into_owned(),
        ]);
    }

    args.extend([
        "-stream_loop".to_string(),
        "-1".to_string(),
        "-i".to_string(),
        audio.to_string_lossy().into_owned(),
    ]);

    let mut filters: Vec<String> = (0..images.len())
        .map(|index| {
            format!(
                "[{index}:v]scale=w={FRAME_WIDTH}:h={FRAME_HEIGHT}:force_original_aspect_ratio=decrease,\
                 pad={FRAME_WIDTH}:{FRAME_HEIGHT}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1[v{index}]"
            )
        })
        .collect();
    let concat_inputs: String = (0..images.len()).map(|index| format!("[v{index}]")).collect();
    filters.push(format!(
        "{concat_inputs}concat=n={}:v=1:a=0[vout]",
        images.len()
    ));
    filters.push(format!(
        "[{}:a]atrim=0:{}[aout]",
        images.len(),
        images.len() * FRAME_SECONDS
    ));

    args.extend([
        "-filter_complex".to_string(),
        filters.join(";"),
        "-map".to_string(),
        "[vout]".to_string(),
        "-map".to_string(),
        "[aout]".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-shortest".to_string(),
        output.to_string_lossy().into_owned(),
    ]);

    args
}

pub async fn run_ffmpeg(args: Vec<String>) -> Result<(), ApiError> {
    let command_future = Command::new("ffmpeg").args(args).kill_on_drop(true).output();
    let output = timeout(Duration::from_secs(FFMPEG_TIMEOUT_SECONDS), command_future)
        .await
        .map_err(|_| ApiError::internal("Slideshow rendering timed out."))?
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ApiError::internal("ffmpeg is not installed on the server.")
            } else {
                ApiError::internal(format!("Could not run ffmpeg: {error}"))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().rev().take(5).collect::<Vec<_>>();
        warn!("ffmpeg failed with {}: {:?}", output.status, tail);
        return Err(ApiError::internal("Error creating slideshow."));
    }

    Ok(())
}

pub async fn render(
    http: &reqwest::Client,
    image_urls: &[&str],
    audio_url: &str,
    job_dir: &Path,
) -> Result<PathBuf, ApiError> {
    let (images, audio) = fetch_inputs(http, image_urls, audio_url, job_dir).await?;
    let output = job_dir.join("slideshow.mp4");
    run_ffmpeg(build_ffmpeg_args(&images, &audio, &output)).await?;
    Ok(output)
}

pub async fn cleanup_job(job_dir: &Path) {
    if let Err(error) = tokio::fs::remove_dir_all(job_dir).await
        && error.kind() != ErrorKind::NotFound
    {
        info!("Could not remove slideshow job directory: {error}");
    }
}

pub fn schedule_cleanup_job(job_dir: PathBuf) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(JOB_RETENTION_SECONDS)).await;
        cleanup_job(&job_dir).await;
    });
}

/// Sweeps `temp_dir` every `every`, starting one period from now.
pub fn spawn_stale_job_sweeper(temp_dir: PathBuf, every: Duration, older_than_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            cleanup_stale_jobs(&temp_dir, older_than_secs).await;
        }
    })
}

pub async fn cleanup_stale_jobs(temp_dir: &Path, older_than_secs: u64) {
    if older_than_secs == 0 {
        return;
    }

    let mut entries = match tokio::fs::read_dir(temp_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open temp directory for cleanup: {error}");
            }
            return;
        }
    };

    let max_age = Duration::from_secs(older_than_secs);
    let now = std::time::SystemTime::now();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate temp directory for cleanup: {error}");
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("Could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified_at| now.duration_since(modified_at).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(error) = removed
            && error.kind() != ErrorKind::NotFound
        {
            warn!("Could not remove stale temp entry {:?}: {error}", path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffmpeg_args_describe_every_frame() {
        let images = vec![PathBuf::from("/job/image_0.jpg"), PathBuf::from("/job/image_1.jpg")];
        let args = build_ffmpeg_args(&images, Path::new("/job/audio.mp3"), Path::new("/job/out.mp4"));

        assert_eq!(args.iter().filter(|arg| *arg == "-loop").count(), 2);
        assert_eq!(args.last().map(String::as_str), Some("/job/out.mp4"));

        let filter_index = args.iter().position(|arg| arg == "-filter_complex").unwrap();
        let filter = &args[filter_index + 1];
        assert!(filter.contains("[v0][v1]concat=n=2:v=1:a=0[vout]"));
        assert!(filter.contains("[2:a]atrim=0:6[aout]"));
        assert!(filter.contains("pad=1080:1920"));
    }

    #[tokio::test]
    async fn job_dirs_are_created_and_removed() {
        let root = std::env::temp_dir().join(format!("tt-slideshow-{}", Uuid::new_v4()));
        let job_dir = create_job_dir(&root).await.unwrap();
        assert!(job_dir.is_dir());

        cleanup_job(&job_dir).await;
        assert!(!job_dir.exists());

        cleanup_job(&job_dir).await;
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn stale_cleanup_keeps_fresh_jobs() {
        let root = std::env::temp_dir().join(format!("tt-slideshow-{}", Uuid::new_v4()));
        let job_dir = create_job_dir(&root).await.unwrap();

        cleanup_stale_jobs(&root, STALE_JOB_SECONDS).await;
        assert!(job_dir.exists());

        cleanup_stale_jobs(&root, 0).await;
        assert!(job_dir.exists());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn fetch_inputs_keeps_image_order() {
        use wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{method, path},
        };

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"first".to_vec())
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"second".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/track.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio".to_vec()))
            .mount(&server)
            .await;

        let root = std::env::temp_dir().join(format!("tt-slideshow-{}", Uuid::new_v4()));
        let job_dir = create_job_dir(&root).await.unwrap();
        let first = format!("{}/1.jpg", server.uri());
        let second = format!("{}/2.jpg", server.uri());
        let audio_url = format!("{}/track.mp3", server.uri());

        let (images, audio) = fetch_inputs(
            &reqwest::Client::new(),
            &[first.as_str(), second.as_str()],
            &audio_url,
            &job_dir,
        )
        .await
        .unwrap();

        assert_eq!(images, vec![job_dir.join("image_0.jpg"), job_dir.join("image_1.jpg")]);
        assert_eq!(audio, job_dir.join("audio.mp3"));
        assert_eq!(tokio::fs::read(&images[0]).await.unwrap(), b"first");
        assert_eq!(tokio::fs::read(&images[1]).await.unwrap(), b"second");
        assert_eq!(tokio::fs::read(&audio).await.unwrap(), b"audio");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn fetch_inputs_fails_on_missing_asset() {
        use wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{method, path},
        };

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"first".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/track.mp3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let root = std::env::temp_dir().join(format!("tt-slideshow-{}", Uuid::new_v4()));
        let job_dir = create_job_dir(&root).await.unwrap();
        let image_url = format!("{}/1.jpg", server.uri());

        let error = fetch_inputs(
            &reqwest::Client::new(),
            &[image_url.as_str()],
            &format!("{}/track.mp3", server.uri()),
            &job_dir,
        )
        .await
        .unwrap_err();

        assert_eq!(error.status, axum::http::StatusCode::BAD_GATEWAY);
        assert_eq!(error.message, "Media source returned error: 404");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn sweeper_removes_jobs_once_they_age() {
        let root = std::env::temp_dir().join(format!("tt-slideshow-{}", Uuid::new_v4()));
        let job_dir = create_job_dir(&root).await.unwrap();

        let sweeper = spawn_stale_job_sweeper(root.clone(), Duration::from_millis(100), 1);
        let mut removed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !job_dir.exists() {
                removed = true;
                break;
            }
        }
        sweeper.abort();

        assert!(removed);
        assert!(root.exists());
        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
