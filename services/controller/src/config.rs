//! Configuration for the controller.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use podset_reconcile::{backoff, VictimPolicy, Workload, BURST_REPLICAS, DEFAULT_RESYNC_INTERVAL};

use crate::reconciler::ReconcilerConfig;
use crate::worker::WorkerConfig;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Interval between full resyncs.
    pub resync_interval: Duration,

    /// First requeue delay after a failed pass.
    pub requeue_base: Duration,

    /// Requeue delay ceiling.
    pub requeue_max: Duration,

    /// Maximum creates or deletes per pass.
    pub burst_replicas: usize,

    /// How scale-down victims are chosen.
    pub victim_policy: VictimPolicy,

    /// JSON file of workloads loaded into the store at startup.
    pub seed_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("PODSET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let resync_interval = parse_var(&lookup, "PODSET_RESYNC_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RESYNC_INTERVAL);
        if resync_interval.is_zero() {
            anyhow::bail!("PODSET_RESYNC_INTERVAL_SECS must be greater than zero");
        }

        let requeue_base = parse_var(&lookup, "PODSET_REQUEUE_BASE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(backoff::DEFAULT_REQUEUE_BASE);

        let requeue_max = parse_var(&lookup, "PODSET_REQUEUE_MAX_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(backoff::DEFAULT_REQUEUE_MAX);
        if requeue_max < requeue_base {
            anyhow::bail!("requeue ceiling {requeue_max:?} is below base delay {requeue_base:?}");
        }

        let burst_replicas = parse_var(&lookup, "PODSET_BURST_REPLICAS")?.unwrap_or(BURST_REPLICAS);
        if burst_replicas == 0 {
            anyhow::bail!("PODSET_BURST_REPLICAS must be greater than zero");
        }

        let victim_policy = match lookup("PODSET_VICTIM_POLICY") {
            Some(raw) => raw
                .parse::<VictimPolicy>()
                .map_err(anyhow::Error::msg)
                .context("invalid PODSET_VICTIM_POLICY")?,
            None => VictimPolicy::default(),
        };

        let seed_file = lookup("PODSET_SEED_FILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            log_level,
            resync_interval,
            requeue_base,
            requeue_max,
            burst_replicas,
            victim_policy,
            seed_file,
        })
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            burst_replicas: self.burst_replicas,
            victim_policy: self.victim_policy,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            resync_interval: self.resync_interval,
            requeue_base: self.requeue_base,
            requeue_max: self.requeue_max,
            ..WorkerConfig::default()
        }
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid {name}: {raw:?}"))
        })
        .transpose()
}

/// Read the workloads listed in a seed file.
pub fn load_seed_workloads(path: &Path) -> Result<Vec<Workload>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse seed file {}", path.display()))
}
