//! Best-effort capture of job pod logs into `<log_dir>/<pod>.log`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::AsyncBufReadExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{error, info, instrument};

use crate::io::cluster::{Cluster, PodRecord};

/// Outcome of capturing one pod's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCapture {
    Written { path: PathBuf, bytes: usize },
    Failed { error: String },
}

/// Capture result for one pod of the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodLogResult {
    pub pod: PodRecord,
    pub capture: LogCapture,
}

impl PodLogResult {
    pub fn is_written(&self) -> bool {
        matches!(self.capture, LogCapture::Written { .. })
    }
}

/// Path of the artifact for `pod_name` under `log_dir`.
pub fn log_artifact_path(log_dir: &Path, pod_name: &str) -> PathBuf {
    log_dir.join(format!("{pod_name}.log"))
}

/// Resolve and create the directory pod logs are written to.
///
/// `None` means the current working directory.
pub fn prepare_log_dir(log_dir: Option<&Path>) -> Result<PathBuf> {
    match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            info!(log_dir = %dir.display(), "job log path");
            Ok(dir.to_path_buf())
        }
        None => std::env::current_dir().context("resolve current directory"),
    }
}

/// Capture the log of every pod of `job_name`, one pod at a time.
///
/// Fails only if the pods cannot be listed. A failure for one pod is logged
/// and recorded in its [`PodLogResult`]; the remaining pods are still tried.
#[instrument(skip_all, fields(job = %job_name, log_dir = %log_dir.display()))]
pub async fn capture_job_logs<C: Cluster + ?Sized>(
    cluster: &C,
    job_name: &str,
    log_dir: &Path,
) -> Result<Vec<PodLogResult>> {
    let pods = cluster
        .list_job_pods(job_name)
        .await
        .context("list job pods")?;
    info!(pods = pods.len(), "capturing job pod logs");

    let mut results = Vec::with_capacity(pods.len());
    for pod in pods {
        let capture = match capture_pod_log(cluster, &pod, log_dir).await {
            Ok((path, bytes)) => LogCapture::Written { path, bytes },
            Err(err) => {
                let message = format!("{err:#}");
                error!(pod = %pod, err = %message, "unable to write job pod log file");
                LogCapture::Failed { error: message }
            }
        };
        results.push(PodLogResult { pod, capture });
    }
    Ok(results)
}

/// Stream one pod's log into a new artifact, re-encoded as UTF-8.
///
/// The log stream is opened before the file is created, so a pod whose log
/// cannot be fetched leaves no empty artifact behind. A read error part way
/// through keeps what was written so far.
async fn capture_pod_log<C: Cluster + ?Sized>(
    cluster: &C,
    pod: &PodRecord,
    log_dir: &Path,
) -> Result<(PathBuf, usize)> {
    let mut reader = cluster.pod_log(pod).await?;

    let path = log_artifact_path(log_dir, &pod.name);
    info!(path = %path.display(), "saving job pod log");
    let file = File::create(&path)
        .await
        .with_context(|| format!("create log file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let mut decoder = LossyUtf8::default();
    let mut written = 0;
    loop {
        let chunk = reader
            .fill_buf()
            .await
            .with_context(|| format!("read log of pod {pod}"))?;
        if chunk.is_empty() {
            break;
        }
        let consumed = chunk.len();
        let text = decoder.decode(chunk);
        reader.consume_unpin(consumed);
        out.write_all(text.as_bytes())
            .await
            .with_context(|| format!("write log file {}", path.display()))?;
        written += text.len();
    }
    let tail = decoder.finish();
    out.write_all(tail.as_bytes())
        .await
        .with_context(|| format!("write log file {}", path.display()))?;
    written += tail.len();
    out.flush()
        .await
        .with_context(|| format!("flush log file {}", path.display()))?;
    Ok((path, written))
}

/// Incremental lossy UTF-8 decoder.
///
/// Invalid sequences become U+FFFD. A multi-byte character split across two
/// chunks is held back until the rest of it arrives.
#[derive(Debug, Default)]
struct LossyUtf8 {
    pending: Vec<u8>,
}

impl LossyUtf8 {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        // Truncated sequence at the end; wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        text
    }

    /// Flush a trailing truncated sequence.
    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}
