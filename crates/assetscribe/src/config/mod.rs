pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_env, load_config_from_str,
    load_config_with_env, validate_config,
};
pub use schema::{
    Config, LogFormat, LoggingConfig, MediaConfig, SecretRef, StoreConfig, TranscriptionConfig,
    WorkerConfig, DEFAULT_MAX_CHUNK_SIZE_BYTES,
};
