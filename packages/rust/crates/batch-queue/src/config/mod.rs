//! Config namespace: manager configuration and settings file loading.

mod manager;
mod settings;

pub use manager::{JobManagerConfig, RequeuePolicy, RetryBackoff, default_state_dir};
pub use settings::{
    QueueSection, QueueSettings, load_queue_settings, load_queue_settings_from_paths,
    queue_settings_paths, set_config_home_override,
};
