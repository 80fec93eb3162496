use crate::config::{ARCHIVE_EXTENSIONS, USER_AGENT};
use crate::disk::get_available_disk_space;
use crate::error::DownloadError;
use crate::fileops::RateMeter;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// File name used when the URL path has no usable last segment.
const FALLBACK_FILE_NAME: &str = "build.zip";

#[derive(Debug, Clone)]
pub enum DownloadProgress {
    Started { total_bytes: u64 },
    Redirected { url: String },
    Progress {
        downloaded: u64,
        total: u64,
        bytes_per_sec: u64,
    },
    Completed,
    Cancelled,
}

/// HTTP client for build downloads. Redirects are followed by hand so only
/// one hop is ever taken.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

fn last_segment(url: &reqwest::Url) -> Option<&str> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
}

fn has_archive_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Name the download after the final URL when it looks like an archive,
/// otherwise after the requested URL. Release assets redirect to storage
/// paths that carry no extension.
fn file_name_from_urls(requested: Option<&reqwest::Url>, final_url: &reqwest::Url) -> String {
    let final_name = last_segment(final_url);
    if let Some(name) = final_name.filter(|name| has_archive_extension(name)) {
        return name.to_string();
    }
    requested
        .and_then(last_segment)
        .filter(|name| has_archive_extension(name))
        .or(final_name)
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

async fn get_following_one_redirect(
    client: &reqwest::Client,
    url: &str,
    progress_tx: &mpsc::UnboundedSender<DownloadProgress>,
) -> Result<reqwest::Response, DownloadError> {
    let response = client.get(url).send().await?;
    if !response.status().is_redirection() {
        return Ok(response);
    }

    let Some(location) = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
    else {
        return Err(DownloadError::Status(response.status().as_u16()));
    };
    let target = response
        .url()
        .join(location)
        .map_err(|_| DownloadError::Status(response.status().as_u16()))?;

    crate::debug::log(&format!("Redirected to: {}", target));
    let _ = progress_tx.send(DownloadProgress::Redirected {
        url: target.to_string(),
    });

    let response = client.get(target).send().await?;
    if response.status().is_redirection() {
        return Err(DownloadError::TooManyRedirects);
    }
    Ok(response)
}

/// Stream `url` into `dest_dir`, named after the archive file the URLs point
/// at. A cancelled or failed download removes its partial file.
pub async fn download_build(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
    progress_tx: mpsc::UnboundedSender<DownloadProgress>,
    cancel_token: CancellationToken,
) -> Result<PathBuf, DownloadError> {
    crate::debug::log_section("Download Build");
    crate::debug::log(&format!("URL: {}", url));

    // Check for cancellation before starting
    if cancel_token.is_cancelled() {
        let _ = progress_tx.send(DownloadProgress::Cancelled);
        return Err(DownloadError::Cancelled);
    }

    let response = tokio::select! {
        _ = cancel_token.cancelled() => {
            let _ = progress_tx.send(DownloadProgress::Cancelled);
            return Err(DownloadError::Cancelled);
        }
        response = get_following_one_redirect(client, url, &progress_tx) => response?,
    };

    if !response.status().is_success() {
        crate::debug::log(&format!("ERROR: server answered {}", response.status()));
        return Err(DownloadError::Status(response.status().as_u16()));
    }

    let requested = reqwest::Url::parse(url).ok();
    let dest_path = dest_dir.join(file_name_from_urls(requested.as_ref(), response.url()));
    let total_size = response.content_length().unwrap_or(0);
    crate::debug::log(&format!("Saving to: {:?} ({} bytes)", dest_path, total_size));

    let available = get_available_disk_space(dest_dir);
    if total_size > available {
        crate::debug::log(&format!(
            "ERROR: insufficient disk space, need {} have {}",
            total_size, available
        ));
        return Err(DownloadError::InsufficientSpace {
            needed: total_size,
            available,
        });
    }

    let _ = progress_tx.send(DownloadProgress::Started { total_bytes: total_size });

    let mut file = File::create(&dest_path).await?;
    let mut downloaded: u64 = 0;
    let mut meter = RateMeter::new();
    let mut stream = response.bytes_stream();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                // Clean up partial file
                drop(file);
                let _ = tokio::fs::remove_file(&dest_path).await;
                crate::debug::log("Download cancelled by user");
                let _ = progress_tx.send(DownloadProgress::Cancelled);
                return Err(DownloadError::Cancelled);
            }
            chunk_result = stream.next() => {
                match chunk_result {
                    Some(Ok(chunk)) => {
                        if let Err(e) = file.write_all(&chunk).await {
                            drop(file);
                            let _ = tokio::fs::remove_file(&dest_path).await;
                            return Err(e.into());
                        }

                        downloaded += chunk.len() as u64;
                        let _ = progress_tx.send(DownloadProgress::Progress {
                            downloaded,
                            total: total_size.max(downloaded),
                            bytes_per_sec: meter.sample(downloaded),
                        });
                    }
                    Some(Err(e)) => {
                        drop(file);
                        let _ = tokio::fs::remove_file(&dest_path).await;
                        crate::debug::log(&format!("ERROR: download error: {}", e));
                        return Err(e.into());
                    }
                    None => {
                        // Stream complete
                        break;
                    }
                }
            }
        }
    }

    file.flush().await?;
    crate::debug::log(&format!("Downloaded {} bytes", downloaded));
    let _ = progress_tx.send(DownloadProgress::Completed);

    Ok(dest_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{HttpFixture, Route};

    fn drain(mut rx: mpsc::UnboundedReceiver<DownloadProgress>) -> Vec<DownloadProgress> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn follows_one_redirect_and_names_file_from_final_url() {
        let server = HttpFixture::start(vec![
            ("/latest", Route::Redirect("/files/cdda-windows-tiles-x64.zip".into())),
            ("/files/cdda-windows-tiles-x64.zip", Route::Body(vec![9u8; 50_000])),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let path = download_build(
            &build_client().unwrap(),
            &server.url("/latest"),
            dir.path(),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(path.file_name().unwrap(), "cdda-windows-tiles-x64.zip");
        assert_eq!(std::fs::read(&path).unwrap().len(), 50_000);

        let events = drain(rx);
        assert!(events.iter().any(|e| matches!(e, DownloadProgress::Redirected { .. })));
        let mut last = 0;
        for event in &events {
            if let DownloadProgress::Progress { downloaded, .. } = event {
                assert!(*downloaded >= last);
                last = *downloaded;
            }
        }
        assert_eq!(last, 50_000);
        assert!(matches!(events.last(), Some(DownloadProgress::Completed)));
    }

    #[tokio::test]
    async fn second_redirect_is_refused() {
        let server = HttpFixture::start(vec![
            ("/a", Route::Redirect("/b".into())),
            ("/b", Route::Redirect("/c".into())),
            ("/c", Route::Body(b"never".to_vec())),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = download_build(
            &build_client().unwrap(),
            &server.url("/a"),
            dir.path(),
            tx,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(DownloadError::TooManyRedirects)));
    }

    #[tokio::test]
    async fn missing_file_reports_status() {
        let server = HttpFixture::start(vec![]).await;
        let dir = tempfile::tempdir().unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = download_build(
            &build_client().unwrap(),
            &server.url("/nothing.zip"),
            dir.path(),
            tx,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(DownloadError::Status(404))));
    }

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let (tx, rx) = mpsc::unbounded_channel();
        let result = download_build(
            &build_client().unwrap(),
            "http://127.0.0.1:9/never.zip",
            dir.path(),
            tx,
            token,
        )
        .await;

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(matches!(drain(rx).last(), Some(DownloadProgress::Cancelled)));
    }

    #[test]
    fn file_name_falls_back_for_bare_urls() {
        let url = reqwest::Url::parse("https://example.invalid/").unwrap();
        assert_eq!(file_name_from_urls(None, &url), FALLBACK_FILE_NAME);
    }

    #[test]
    fn extensionless_storage_path_keeps_the_requested_name() {
        let requested =
            reqwest::Url::parse("https://github.com/o/r/releases/download/t/cdda-windows-tiles-x64.zip").unwrap();
        let storage = reqwest::Url::parse("https://objects.example.invalid/1234/8c1d2e3f-aaaa").unwrap();
        assert_eq!(file_name_from_urls(Some(&requested), &storage), "cdda-windows-tiles-x64.zip");

        let renamed = reqwest::Url::parse("https://mirror.example.invalid/cdda.7z").unwrap();
        assert_eq!(file_name_from_urls(Some(&requested), &renamed), "cdda.7z");
    }

    #[tokio::test]
    async fn redirect_to_extensionless_path_is_named_after_the_asset() {
        let server = HttpFixture::start(vec![
            (
                "/releases/download/t/cdda-linux-tiles-x64.tar.zip",
                Route::Redirect("/release-asset/1234/8c1d2e3f-aaaa-bbbb".into()),
            ),
            ("/release-asset/1234/8c1d2e3f-aaaa-bbbb", Route::Body(vec![1u8; 1_000])),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let path = download_build(
            &build_client().unwrap(),
            &server.url("/releases/download/t/cdda-linux-tiles-x64.tar.zip"),
            dir.path(),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(path.file_name().unwrap(), "cdda-linux-tiles-x64.tar.zip");
    }
}
