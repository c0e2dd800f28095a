use crate::archive::ArchiveRef;
use crate::crawler::check_status;
use crate::error::{FetchError, Result};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::storage_utils::tmp_path_for;
use futures::{StreamExt, stream};
use reqwest::Client;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

/// Result of one unit of concurrent work, keyed by what it worked on.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub key: String,
    pub result: Result<T>,
}

impl<T> TaskOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Spawns every job on the runtime with at most `max_concurrency` in flight
/// and waits for all of them.
///
/// A failing or panicking job never cancels its siblings. Outcomes come back
/// in the order the jobs were given.
pub async fn fan_out<T, Fut>(jobs: Vec<(String, Fut)>, max_concurrency: usize) -> Vec<TaskOutcome<T>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let mut outcomes: Vec<(usize, TaskOutcome<T>)> = stream::iter(jobs.into_iter().enumerate())
        .map(|(index, (key, job))| {
            let handle = tokio::spawn(job);
            async move {
                let result = handle.await.unwrap_or_else(|e| Err(FetchError::Join(e)));
                (index, TaskOutcome { key, result })
            }
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Streams `url` into `save_path`. The body lands in a `.tmp` sibling first
/// and is renamed into place only once fully written, so a failure never
/// leaves a file under the final name. Returns the number of bytes written.
#[instrument(skip(client, retry))]
pub async fn download_file(
    client: &Client,
    url: &str,
    save_path: &Path,
    retry: &RetryPolicy,
) -> Result<u64> {
    info!("starting download");
    let response = retry_with_backoff(retry, || async move {
        let response = client.get(url).send().await.map_err(FetchError::from)?;
        check_status(response).await
    })
    .await?;

    let tmp_path = tmp_path_for(save_path);
    let written = async {
        let bytes = stream_to_file(response, &tmp_path).await?;
        tokio::fs::rename(&tmp_path, save_path)
            .await
            .map_err(|e| FetchError::filesystem(save_path, e))?;
        Ok::<_, FetchError>(bytes)
    }
    .await;

    match written {
        Ok(bytes) => {
            info!(bytes, path = %save_path.display(), "downloaded");
            Ok(bytes)
        }
        Err(e) => {
            // partial or orphaned temp file
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Err(e)
        }
    }
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| FetchError::filesystem(path, e))?;

    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::filesystem(path, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| FetchError::filesystem(path, e))?;
    Ok(written)
}

/// Downloads every archive into `save_dir`, one task per file.
///
/// Individual failures are logged and returned as outcomes; they do not stop
/// the remaining downloads.
pub async fn download_all(
    client: &Client,
    refs: Vec<ArchiveRef>,
    save_dir: &Path,
    max_concurrency: usize,
    retry: &RetryPolicy,
) -> Vec<TaskOutcome<PathBuf>> {
    let jobs: Vec<_> = refs
        .into_iter()
        .map(|archive| {
            let client = client.clone();
            let retry = retry.clone();
            let save_path = archive.save_path(save_dir);
            let key = archive.file_name.clone();
            let job = async move {
                match download_file(&client, &archive.url, &save_path, &retry).await {
                    Ok(_) => Ok(save_path),
                    Err(e) => {
                        warn!(url = %archive.url, error = %e, "download failed");
                        Err(e)
                    }
                }
            };
            (key, job)
        })
        .collect();

    fan_out(jobs, max_concurrency).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn outcomes_keep_job_order_and_isolate_failures() {
        let jobs: Vec<(String, _)> = (0..6u64)
            .map(|i| {
                let job = async move {
                    // later jobs finish first
                    tokio::time::sleep(Duration::from_millis(30 - i * 5)).await;
                    if i % 2 == 0 {
                        Ok(i)
                    } else {
                        Err(FetchError::Config(format!("job {i} failed")))
                    }
                };
                (format!("job-{i}"), job)
            })
            .collect();

        let outcomes = fan_out(jobs, 3).await;

        let keys: Vec<&str> = outcomes.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["job-0", "job-1", "job-2", "job-3", "job-4", "job-5"]);
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 3);
        assert_eq!(*outcomes[4].result.as_ref().unwrap(), 4);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<(String, _)> = (0..20)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                let job = async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), FetchError>(())
                };
                (i.to_string(), job)
            })
            .collect();

        let outcomes = fan_out(jobs, 4).await;
        assert_eq!(outcomes.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    type BoxedJob = std::pin::Pin<Box<dyn Future<Output = Result<u8>> + Send>>;

    async fn explode() -> Result<u8> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panicking_job_becomes_a_join_failure() {
        let ok: BoxedJob = Box::pin(async { Ok::<u8, FetchError>(1) });
        let boom: BoxedJob = Box::pin(explode());
        let jobs = vec![("ok".to_string(), ok), ("boom".to_string(), boom)];

        let outcomes = fan_out(jobs, 2).await;
        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1].result, Err(FetchError::Join(_))));
    }

    #[tokio::test]
    async fn empty_job_list_completes() {
        let jobs: Vec<(String, std::future::Ready<Result<()>>)> = Vec::new();
        assert!(fan_out(jobs, 8).await.is_empty());
    }
}
