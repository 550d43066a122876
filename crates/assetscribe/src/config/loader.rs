use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{Config, LogFormat, StoreConfig};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Loads a config file, then applies process environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_with_env(&content, |name| std::env::var(name).ok())
}

/// Builds a config from defaults plus process environment overrides, for
/// deployments that configure the worker through env vars only.
pub fn load_config_from_env() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Parses and validates a config document without consulting the environment.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config = parse_config(content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config_with_env<F>(content: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = parse_config(content)?;
    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;
    validate_schema(&json_value)?;
    Ok(serde_json::from_value(json_value)?)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Applies the worker's environment variables on top of `config`.
///
/// Unset or empty variables leave the config untouched; malformed numbers are
/// reported as [`ConfigError::InvalidEnv`].
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = get("API_BASE_URL") {
        match &mut config.store {
            StoreConfig::Http { base_url, .. } => *base_url = url.trim().to_string(),
            StoreConfig::Sqlite { .. } => {
                log::warn!("API_BASE_URL is set but the sqlite store is configured; ignoring")
            }
        }
    }
    if let Some(key) = get("SERVER_API_KEY") {
        if let StoreConfig::Http { api_key, .. } = &mut config.store {
            api_key.value = Some(key);
        }
    }
    if let Some(key) = get("OPENAI_API_KEY") {
        config.transcription.api_key.value = Some(key);
    }
    if let Some(model) = get("OPENAI_MODEL") {
        config.transcription.model = model.trim().to_string();
    }
    if let Some(dir) = get("TEMP_DIR") {
        config.worker.temp_dir = dir.trim().to_string();
    }
    if let Some(value) = get("MAX_JOB_ATTEMPTS") {
        config.worker.max_job_attempts = parse_env("MAX_JOB_ATTEMPTS", &value)?;
    }
    if let Some(value) = get("MAX_NUM_WORKERS") {
        config.worker.max_concurrent_jobs = parse_env("MAX_NUM_WORKERS", &value)?;
    }
    if let Some(value) = get("HEARTBEAT_INTERVAL_SECONDS") {
        config.worker.heartbeat_interval_seconds =
            parse_env("HEARTBEAT_INTERVAL_SECONDS", &value)?;
    }
    if let Some(value) = get("MAX_CHUNK_SIZE_BYTES") {
        config.media.max_chunk_size_bytes = parse_env("MAX_CHUNK_SIZE_BYTES", &value)?;
    }
    if let Some(value) = get("LOG_FORMAT") {
        config.logging.format = match value.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => LogFormat::Plain,
            "json" => LogFormat::Json,
            _ => {
                return Err(ConfigError::InvalidEnv {
                    name: "LOG_FORMAT".to_string(),
                    value,
                    reason: "expected 'plain' or 'json'".to_string(),
                })
            }
        };
    }

    Ok(())
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let temp_root = config.worker.temp_root();
    if !temp_root.is_absolute() {
        return Err(ConfigError::Validation {
            message: format!(
                "Temporary directory must be an absolute path, got '{}'",
                config.worker.temp_dir
            ),
        });
    }

    let positive = [
        ("media.maxChunkSizeBytes", config.media.max_chunk_size_bytes),
        ("worker.maxJobAttempts", config.worker.max_job_attempts as u64),
        ("worker.maxConcurrentJobs", config.worker.max_concurrent_jobs as u64),
        (
            "worker.heartbeatIntervalSeconds",
            config.worker.heartbeat_interval_seconds,
        ),
        ("worker.pollIntervalMs", config.worker.poll_interval_ms),
        (
            "transcription.maxConcurrentRequests",
            config.transcription.max_concurrent_requests as u64,
        ),
        ("transcription.maxAttempts", config.transcription.max_attempts as u64),
        (
            "transcription.requestTimeoutSeconds",
            config.transcription.request_timeout_seconds,
        ),
    ];
    for (name, value) in positive {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", name),
            });
        }
    }

    let margin = config.media.safety_margin;
    if !(margin > 0.0 && margin <= 1.0) {
        return Err(ConfigError::Validation {
            message: format!("media.safetyMargin must be in (0, 1], got {}", margin),
        });
    }

    if config.transcription.initial_backoff_ms > config.transcription.max_backoff_ms {
        return Err(ConfigError::Validation {
            message: "transcription.initialBackoffMs must not exceed maxBackoffMs".to_string(),
        });
    }

    if let StoreConfig::Http { base_url, .. } = &config.store {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Validation {
                message: format!("store.baseUrl must be an http(s) URL, got '{}'", base_url),
            });
        }
    }

    Ok(())
}
