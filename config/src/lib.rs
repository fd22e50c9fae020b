pub mod config;
pub mod defaults;
pub mod queue;
pub mod settings;

pub use config::{
    DEFAULT_CONFIG_FILENAME, ENV_CONFIG_KEY, load_toml_settings, resolve_config_source,
};
pub use defaults::*;
pub use queue::validate_queue_name;
pub use settings::{FailurePolicyKind, WorklessSettings};
