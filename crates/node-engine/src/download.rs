//! Resumable HTTP download
//!
//! The body is streamed into `<path>.temp`. An existing temp file is resumed
//! with a `Range` request; a server that answers 200 instead of 206 gets the
//! file written from scratch. The temp file is renamed into place only when
//! every expected byte arrived.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::{NodeEngineError, Result};
use crate::jobs::{interrupted, JobHandle};

/// Bytes received so far and bytes expected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub received: u64,
    /// 0 while unknown
    pub total: u64,
}

impl DownloadStats {
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.received as f64 / self.total as f64
        }
    }

    /// `42.0% (4.2 MB / 10.0 MB)`
    pub fn describe(&self) -> String {
        if self.total == 0 {
            return format_bytes(self.received);
        }
        format!(
            "{:.1}% ({} / {})",
            self.progress() * 100.0,
            format_bytes(self.received),
            format_bytes(self.total)
        )
    }
}

fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit + 1 < UNITS.len() {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".temp");
    PathBuf::from(name)
}

async fn canceled(temp: &Path, delete: bool) -> NodeEngineError {
    if delete {
        if let Err(e) = tokio::fs::remove_file(temp).await {
            log::warn!("Can't remove {}: {}", temp.display(), e);
        }
    }
    interrupted("downloading")
}

/// Download `url` into `path`, reporting through `job`
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    delete_on_cancel: bool,
    job: &JobHandle,
) -> Result<DownloadStats> {
    let temp = temp_path(path);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let resume_from = tokio::fs::metadata(&temp).await.map(|m| m.len()).unwrap_or(0);

    let mut request = client.get(url);
    if resume_from > 0 {
        log::debug!("Resuming {} from byte {}", url, resume_from);
        request = request.header(RANGE, format!("bytes={}-", resume_from));
    }

    let response = tokio::select! {
        biased;
        _ = job.cancelled() => return Err(canceled(&temp, delete_on_cancel).await),
        response = request.send() => response?,
    };

    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
        return Err(NodeEngineError::failed(format!("statusCode: {}", status.as_u16())));
    }

    let resumed = resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;
    let mut file = if resumed {
        OpenOptions::new().append(true).open(&temp).await?
    } else {
        File::create(&temp).await?
    };

    let mut stats = DownloadStats {
        received: if resumed { resume_from } else { 0 },
        total: 0,
    };
    if let Some(len) = response.content_length() {
        stats.total = stats.received + len;
    }
    job.set_progress(stats.progress().max(job.progress()), &stats.describe());

    let mut body = response.bytes_stream();
    loop {
        tokio::select! {
            biased;
            _ = job.cancelled() => {
                drop(file);
                return Err(canceled(&temp, delete_on_cancel).await);
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await?;
                    stats.received += bytes.len() as u64;
                    job.set_progress(stats.progress(), &stats.describe());
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
        }
    }
    file.flush().await?;
    drop(file);

    if stats.total == 0 {
        stats.total = stats.received;
    }
    if stats.received != stats.total {
        return Err(NodeEngineError::failed(format!(
            "download incomplete: {} of {} bytes",
            stats.received, stats.total
        )));
    }

    tokio::fs::rename(&temp, path).await?;
    job.set_progress(1.0, &stats.describe());
    log::info!("Downloaded {} into {}", url, path.display());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::jobs::JobManager;
    use crate::test_http::{serve, Reply};

    fn body() -> Vec<u8> {
        (0..2000u32).map(|i| (i % 251) as u8).collect()
    }

    async fn run(jobs: &JobManager, url: String, path: PathBuf, delete: bool) -> JobHandle {
        let client = jobs.http_client().clone();
        let job_path = path.clone();
        jobs.add_job("dl", move |h| async move {
            download(&client, &url, &job_path, delete, &h).await.map(|_| ())
        })
    }

    async fn wait_done(handle: &JobHandle) {
        while !handle.is_done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_stats_description() {
        let stats = DownloadStats {
            received: 500_000,
            total: 2_000_000,
        };
        assert_eq!(stats.progress(), 0.25);
        assert_eq!(stats.describe(), "25.0% (500.0 KB / 2.0 MB)");
        assert_eq!(temp_path(Path::new("/a/b.bin")), PathBuf::from("/a/b.bin.temp"));
    }

    #[tokio::test]
    async fn test_fresh_download() {
        let server = serve(Reply::File { body: body(), ranges: true }).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/file.bin");
        let jobs = JobManager::new(Duration::from_secs(5)).unwrap();

        let handle = run(&jobs, format!("{}/file.bin", server.url), path.clone(), false).await;
        wait_done(&handle).await;

        assert_eq!(handle.error(), None);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), body());
        assert!(!temp_path(&path).exists());
        assert_eq!(handle.progress(), 1.0);
        assert!(server.requests.lock()[0].header("range").is_none());
    }

    #[tokio::test]
    async fn test_resume_with_range() {
        let server = serve(Reply::File { body: body(), ranges: true }).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        tokio::fs::write(temp_path(&path), &body()[..700]).await.unwrap();
        let jobs = JobManager::new(Duration::from_secs(5)).unwrap();

        let handle = run(&jobs, server.url.clone(), path.clone(), false).await;
        wait_done(&handle).await;

        assert_eq!(handle.error(), None);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), body());
        assert_eq!(server.requests.lock()[0].header("range"), Some("bytes=700-"));
    }

    #[tokio::test]
    async fn test_full_reply_to_range_truncates() {
        let server = serve(Reply::File { body: body(), ranges: false }).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        tokio::fs::write(temp_path(&path), b"stale bytes").await.unwrap();
        let jobs = JobManager::new(Duration::from_secs(5)).unwrap();

        let handle = run(&jobs, server.url.clone(), path.clone(), false).await;
        wait_done(&handle).await;

        assert_eq!(handle.error(), None);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), body());
    }

    #[tokio::test]
    async fn test_cancel_keeps_or_deletes_temp() {
        for delete in [false, true] {
            let server = serve(Reply::Stall { body: body(), sent: 500 }).await;
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("file.bin");
            let jobs = JobManager::new(Duration::from_secs(5)).unwrap();

            let handle = run(&jobs, server.url.clone(), path.clone(), delete).await;
            while handle.progress() < 0.2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            handle.interrupt();
            wait_done(&handle).await;

            assert_eq!(handle.error().as_deref(), Some("downloading canceled"));
            assert!(!path.exists());
            assert_eq!(temp_path(&path).exists(), !delete);
        }
    }
}
