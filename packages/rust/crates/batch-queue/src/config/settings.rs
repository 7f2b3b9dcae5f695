//! Settings loader for the batch queue.
//!
//! Loads and merges:
//! - System defaults: `<PRJ_ROOT>/packages/conf/batch-queue.yaml`
//! - User overrides:  `<PRJ_CONFIG_HOME>/batch-queue/settings.yaml`
//!
//! Merge precedence is user over system.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;

use super::manager::RequeuePolicy;

const DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH: &str = "packages/conf/batch-queue.yaml";
const DEFAULT_USER_SETTINGS_RELATIVE_PATH: &str = "batch-queue/settings.yaml";
const DEFAULT_CONFIG_HOME_RELATIVE_PATH: &str = ".config";
const DEFAULT_DATA_HOME_RELATIVE_PATH: &str = ".data";
static CONFIG_HOME_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Top-level settings document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSettings {
    /// Queue tuning knobs.
    #[serde(default)]
    pub queue: QueueSection,
}

/// `queue:` section. Every field is optional so files can be layered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSection {
    /// Worker pool size.
    pub max_workers: Option<usize>,
    /// Job changes between automatic checkpoints.
    pub checkpoint_interval: Option<usize>,
    /// Per-job deadline; fractional seconds allowed.
    pub job_timeout_secs: Option<f64>,
    /// State directory, relative to `PRJ_ROOT` unless absolute.
    pub state_dir: Option<String>,
    /// Checkpoint automatically.
    pub auto_save: Option<bool>,
    /// Reload persisted state at construction.
    pub enable_recovery: Option<bool>,
    /// Retry budget for manager-built jobs.
    pub default_max_retries: Option<u32>,
    /// `tail` or `head`.
    pub requeue_policy: Option<RequeuePolicy>,
    /// Delay before the first retry; doubles per attempt.
    pub retry_backoff_secs: Option<f64>,
    /// Cap on a single retry delay.
    pub retry_backoff_max_secs: Option<f64>,
    /// Lifecycle event buffer.
    pub event_capacity: Option<usize>,
}

impl QueueSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            queue: self.queue.merge(overlay.queue),
        }
    }
}

impl QueueSection {
    fn merge(self, overlay: Self) -> Self {
        Self {
            max_workers: overlay.max_workers.or(self.max_workers),
            checkpoint_interval: overlay.checkpoint_interval.or(self.checkpoint_interval),
            job_timeout_secs: overlay.job_timeout_secs.or(self.job_timeout_secs),
            state_dir: overlay.state_dir.or(self.state_dir),
            auto_save: overlay.auto_save.or(self.auto_save),
            enable_recovery: overlay.enable_recovery.or(self.enable_recovery),
            default_max_retries: overlay.default_max_retries.or(self.default_max_retries),
            requeue_policy: overlay.requeue_policy.or(self.requeue_policy),
            retry_backoff_secs: overlay.retry_backoff_secs.or(self.retry_backoff_secs),
            retry_backoff_max_secs: overlay
                .retry_backoff_max_secs
                .or(self.retry_backoff_max_secs),
            event_capacity: overlay.event_capacity.or(self.event_capacity),
        }
    }
}

/// Load merged queue settings (user overrides system).
pub fn load_queue_settings() -> QueueSettings {
    let (system_path, user_path) = queue_settings_paths();
    load_queue_settings_from_paths(&system_path, &user_path)
}

/// `(system, user)` settings paths for the current environment.
pub fn queue_settings_paths() -> (PathBuf, PathBuf) {
    let root = project_root();
    let system_path = root.join(DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH);
    let user_path = resolve_config_home(&root).join(DEFAULT_USER_SETTINGS_RELATIVE_PATH);
    (system_path, user_path)
}

/// Load and merge two explicit settings files (`user` wins).
pub fn load_queue_settings_from_paths(system: &Path, user: &Path) -> QueueSettings {
    load_one(system).merge(load_one(user))
}

fn load_one(path: &Path) -> QueueSettings {
    if !path.exists() {
        return QueueSettings::default();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to read settings file; ignoring"
            );
            return QueueSettings::default();
        }
    };
    match serde_yaml::from_str::<QueueSettings>(&raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to parse settings yaml; ignoring file"
            );
            QueueSettings::default()
        }
    }
}

pub(crate) fn project_root() -> PathBuf {
    env_path("PRJ_ROOT")
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

pub(crate) fn data_home() -> PathBuf {
    let root = project_root();
    let configured =
        env_path("PRJ_DATA_HOME").unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_HOME_RELATIVE_PATH));
    absolutize(&root, configured)
}

/// Set config-home override (used by CLI `--conf`).
///
/// The path can be absolute, or relative to `PRJ_ROOT`/cwd.
pub fn set_config_home_override(path: impl Into<PathBuf>) {
    let path = path.into();
    if path.as_os_str().is_empty() {
        return;
    }
    if CONFIG_HOME_OVERRIDE.set(path.clone()).is_err()
        && let Some(current) = CONFIG_HOME_OVERRIDE.get()
        && current != &path
    {
        tracing::warn!(
            current = %current.display(),
            ignored = %path.display(),
            "config home override already set; ignoring subsequent value"
        );
    }
}

fn resolve_config_home(project_root: &Path) -> PathBuf {
    if let Some(path) = CONFIG_HOME_OVERRIDE.get() {
        return absolutize(project_root, path.clone());
    }
    let configured = env_path("PRJ_CONFIG_HOME")
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_HOME_RELATIVE_PATH));
    absolutize(project_root, configured)
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

pub(crate) fn absolutize(project_root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}
