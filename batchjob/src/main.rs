//! Batch job supervisor.
//!
//! Submits the Job described by a spec file, waits for it to succeed or fail,
//! saves the log of each of its pods as `<pod>.log`, deletes the Job, and
//! exits with `0` on success or `1` on failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use batchjob::exit_codes;
use batchjob::io::config::{BatchJobConfig, ClosePolicy, load_config};
use batchjob::io::kube_cluster::KubeCluster;
use batchjob::io::pod_logs::prepare_log_dir;
use batchjob::io::spec::load_job_spec;
use batchjob::lifecycle::{JobLifecycle, LifecycleConfig};
use batchjob::logging;
use clap::Parser;
use k8s_openapi::api::batch::v1::Job;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "batchjob",
    version,
    about = "Run a Kubernetes batch job to completion, save its pod logs, and exit with its status"
)]
struct Cli {
    /// Job spec file (YAML or JSON `batch/v1` Job).
    spec: PathBuf,

    /// Directory for `<pod>.log` files. Created if missing. Defaults to the working directory.
    #[arg(long, visible_alias = "log-path")]
    log_dir: Option<PathBuf>,

    /// Namespace to submit the job into.
    #[arg(long)]
    namespace: Option<String>,

    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Give up on the job after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// What to do if the watch stream closes before the job finishes.
    /// `ignore` keeps waiting and requires --timeout-secs.
    #[arg(long, value_enum)]
    on_watch_close: Option<ClosePolicy>,
}

impl Cli {
    /// Merge flags over the config file.
    fn apply_to(&self, mut cfg: BatchJobConfig) -> Result<BatchJobConfig> {
        if self.namespace.is_some() {
            cfg.namespace = self.namespace.clone();
        }
        if self.log_dir.is_some() {
            cfg.log_dir = self.log_dir.clone();
        }
        if self.timeout_secs.is_some() {
            cfg.watch_timeout_secs = self.timeout_secs;
        }
        if let Some(policy) = self.on_watch_close {
            cfg.on_watch_close = policy;
        }
        cfg.validate_merged()?;
        Ok(cfg)
    }
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if !err.use_stderr() {
                // --help / --version
                err.exit();
            }
            let _ = err.print();
            std::process::exit(exit_codes::INVALID);
        }
    };
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    // Pre-flight: nothing below touches the cluster until these pass.
    let spec = load_job_spec(&cli.spec)?;
    let cfg = match &cli.config {
        Some(path) => load_config(path)?,
        None => BatchJobConfig::default(),
    };
    let cfg = cli.apply_to(cfg)?;
    let log_dir = prepare_log_dir(cfg.log_dir.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(supervise(spec, cfg, &log_dir))
}

async fn supervise(spec: Job, cfg: BatchJobConfig, log_dir: &Path) -> Result<i32> {
    let cluster = KubeCluster::connect(
        cfg.namespace.as_deref(),
        spec.metadata.namespace.as_deref(),
    )
    .await
    .context("connect to cluster")?;

    let lifecycle = JobLifecycle::new(
        Arc::new(cluster),
        LifecycleConfig {
            log_dir: log_dir.to_path_buf(),
            watch_timeout: cfg.watch_timeout(),
            on_watch_close: cfg.on_watch_close,
        },
    );
    let watched = lifecycle.submit_and_watch(&spec).await?;
    let completion = watched.wait().await?;
    info!(
        disposition = ?completion.disposition,
        exit_code = completion.exit_code(),
        "exiting"
    );
    Ok(completion.exit_code())
}
