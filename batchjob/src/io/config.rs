//! Supervisor configuration loaded from an optional TOML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// What to do when the watch stream ends before a terminal event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClosePolicy {
    /// Tear down and exit with the failure code.
    #[default]
    Fail,
    /// Log the closure and keep waiting until the deadline. Needs a deadline.
    Ignore,
}

/// Supervisor configuration (TOML).
///
/// Every field is optional; command-line flags override values read here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchJobConfig {
    /// Namespace to submit into. Falls back to the job manifest, then the client config.
    pub namespace: Option<String>,

    /// Directory for pod log artifacts. Defaults to the working directory.
    pub log_dir: Option<PathBuf>,

    /// Deadline for the whole watch, in seconds. Unset means no deadline.
    pub watch_timeout_secs: Option<u64>,

    pub on_watch_close: ClosePolicy,
}

impl BatchJobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.watch_timeout_secs == Some(0) {
            return Err(anyhow!("watch_timeout_secs must be > 0"));
        }
        if let Some(ns) = &self.namespace
            && ns.trim().is_empty()
        {
            return Err(anyhow!("namespace must not be blank"));
        }
        Ok(())
    }

    /// Checks that only hold once flags are merged over the file.
    ///
    /// An ignored watch closure without a deadline would wait forever.
    pub fn validate_merged(&self) -> Result<()> {
        self.validate()?;
        if self.on_watch_close == ClosePolicy::Ignore && self.watch_timeout_secs.is_none() {
            bail!("on_watch_close = \"ignore\" requires a watch timeout (--timeout-secs)");
        }
        Ok(())
    }

    pub fn watch_timeout(&self) -> Option<Duration> {
        self.watch_timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BatchJobConfig::default()`.
pub fn load_config(path: &Path) -> Result<BatchJobConfig> {
    if !path.exists() {
        return Ok(BatchJobConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BatchJobConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
