// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only snapshot of the serving environment.
//!
//! The snapshot is assembled once from process environment variables and never
//! mutated afterwards. Unset variables fall back to the defaults below; a value
//! that cannot be parsed fails the whole construction.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SAGEMAKER_DEFAULT_INVOCATIONS_ACCEPT` | `application/json` | Accept used when a request has none |
//! | `SAGEMAKER_MODEL_SERVER_TIMEOUT` | `60` | Default response timeout (seconds) |
//! | `SAGEMAKER_MODEL_SERVER_WORKERS` | - | Workers per model |
//! | `SAGEMAKER_BIND_TO_PORT` | `8080` | Inference HTTP port |
//! | `SAGEMAKER_MANAGEMENT_PORT` | `8081` | Management HTTP port |
//! | `SAGEMAKER_TS_BATCH_SIZE` | `1` | Requests batched per inference call |
//! | `SAGEMAKER_TS_MAX_BATCH_DELAY` | `100` | Batch assembly delay (ms) |
//! | `SAGEMAKER_TS_MIN_WORKERS` | `1` | Minimum workers per model |
//! | `SAGEMAKER_TS_MAX_WORKERS` | `1` | Maximum workers per model |
//! | `SAGEMAKER_TS_RESPONSE_TIMEOUT` | `60` | Per-model response timeout (seconds) |
//! | `SAGEMAKER_PROGRAM` | `inference` | Name of the user handler module |
//! | `SAGEMAKER_MODEL_DIR` | `/opt/ml/model` | Model directory when the runtime gives none |

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::content_types;

pub const DEFAULT_INVOCATIONS_ACCEPT_ENV: &str = "SAGEMAKER_DEFAULT_INVOCATIONS_ACCEPT";
pub const MODEL_SERVER_TIMEOUT_ENV: &str = "SAGEMAKER_MODEL_SERVER_TIMEOUT";
pub const MODEL_SERVER_WORKERS_ENV: &str = "SAGEMAKER_MODEL_SERVER_WORKERS";
pub const BIND_TO_PORT_ENV: &str = "SAGEMAKER_BIND_TO_PORT";
pub const MANAGEMENT_PORT_ENV: &str = "SAGEMAKER_MANAGEMENT_PORT";
pub const BATCH_SIZE_ENV: &str = "SAGEMAKER_TS_BATCH_SIZE";
pub const MAX_BATCH_DELAY_ENV: &str = "SAGEMAKER_TS_MAX_BATCH_DELAY";
pub const MIN_WORKERS_ENV: &str = "SAGEMAKER_TS_MIN_WORKERS";
pub const MAX_WORKERS_ENV: &str = "SAGEMAKER_TS_MAX_WORKERS";
pub const RESPONSE_TIMEOUT_ENV: &str = "SAGEMAKER_TS_RESPONSE_TIMEOUT";
pub const PROGRAM_ENV: &str = "SAGEMAKER_PROGRAM";
pub const MODEL_DIR_ENV: &str = "SAGEMAKER_MODEL_DIR";

/// Variables that tune per-model batching in the serving runtime.
pub const BATCHING_VARS: [&str; 5] = [
    BATCH_SIZE_ENV,
    MAX_BATCH_DELAY_ENV,
    MIN_WORKERS_ENV,
    MAX_WORKERS_ENV,
    RESPONSE_TIMEOUT_ENV,
];

pub const DEFAULT_MODEL_DIR: &str = "/opt/ml/model";
pub const DEFAULT_MODULE_NAME: &str = "inference";

/// Serving parameters visible to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Accept used when a request carries none (or `*/*`)
    pub default_accept: String,
    /// Default response timeout in seconds
    pub model_server_timeout: u32,
    /// Workers per model, if configured
    pub model_server_workers: Option<u32>,
    /// Inference HTTP port
    pub inference_http_port: u16,
    /// Management HTTP port
    pub management_http_port: u16,
    /// Maximum requests per batch
    pub batch_size: u32,
    /// Time in milliseconds to wait for a batch to fill
    pub max_batch_delay: u32,
    /// Minimum number of workers per model
    pub min_workers: u32,
    /// Maximum number of workers per model
    pub max_workers: u32,
    /// Per-model response timeout in seconds
    pub response_timeout: u32,
    /// Name under which the user handler module is looked up
    pub module_name: String,
    /// Model directory used when a request does not name one
    pub model_dir: PathBuf,
    batching_overridden: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            default_accept: content_types::JSON.to_string(),
            model_server_timeout: 60,
            model_server_workers: None,
            inference_http_port: 8080,
            management_http_port: 8081,
            batch_size: 1,
            max_batch_delay: 100,
            min_workers: 1,
            max_workers: 1,
            response_timeout: 60,
            module_name: DEFAULT_MODULE_NAME.to_string(),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            batching_overridden: false,
        }
    }
}

impl Environment {
    /// Load the snapshot from environment variables.
    ///
    /// All variables are optional. A variable that is set but does not parse
    /// into its field's type yields [`ConfigError::Invalid`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_accept =
            env::var(DEFAULT_INVOCATIONS_ACCEPT_ENV).unwrap_or(defaults.default_accept);

        let model_server_timeout = parse_var(
            MODEL_SERVER_TIMEOUT_ENV,
            defaults.model_server_timeout,
            "must be a positive integer",
        )?;

        let model_server_workers = match env::var(MODEL_SERVER_WORKERS_ENV) {
            Ok(value) => Some(value.trim().parse().map_err(|_| {
                ConfigError::Invalid(MODEL_SERVER_WORKERS_ENV, "must be a positive integer")
            })?),
            Err(_) => None,
        };

        let inference_http_port = parse_var(
            BIND_TO_PORT_ENV,
            defaults.inference_http_port,
            "must be a valid port number",
        )?;

        let management_http_port = parse_var(
            MANAGEMENT_PORT_ENV,
            defaults.management_http_port,
            "must be a valid port number",
        )?;

        let batch_size = parse_var(
            BATCH_SIZE_ENV,
            defaults.batch_size,
            "must be a positive integer",
        )?;
        let max_batch_delay = parse_var(
            MAX_BATCH_DELAY_ENV,
            defaults.max_batch_delay,
            "must be a positive integer",
        )?;
        let min_workers = parse_var(
            MIN_WORKERS_ENV,
            defaults.min_workers,
            "must be a positive integer",
        )?;
        let max_workers = parse_var(
            MAX_WORKERS_ENV,
            defaults.max_workers,
            "must be a positive integer",
        )?;
        let response_timeout = parse_var(
            RESPONSE_TIMEOUT_ENV,
            defaults.response_timeout,
            "must be a positive integer",
        )?;

        let batching_overridden = BATCHING_VARS.iter().any(|var| env::var_os(var).is_some());

        let module_name = env::var(PROGRAM_ENV)
            .map(|program| normalize_module_name(&program))
            .unwrap_or(defaults.module_name);

        let model_dir = env::var(MODEL_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or(defaults.model_dir);

        Ok(Self {
            default_accept,
            model_server_timeout,
            model_server_workers,
            inference_http_port,
            management_http_port,
            batch_size,
            max_batch_delay,
            min_workers,
            max_workers,
            response_timeout,
            module_name,
            model_dir,
            batching_overridden,
        })
    }

    /// Whether any of the per-model batching variables was set.
    pub fn batching_overridden(&self) -> bool {
        self.batching_overridden
    }

    /// Directory holding user code for the default model directory.
    pub fn code_dir(&self) -> PathBuf {
        code_dir(&self.model_dir)
    }

    /// Set the default accept.
    pub fn with_default_accept(mut self, accept: impl Into<String>) -> Self {
        self.default_accept = accept.into();
        self
    }

    /// Set the user module name.
    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    /// Set the default model directory.
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    /// Set the batching parameters, marking them as explicitly configured.
    pub fn with_batching(
        mut self,
        batch_size: u32,
        max_batch_delay: u32,
        min_workers: u32,
        max_workers: u32,
        response_timeout: u32,
    ) -> Self {
        self.batch_size = batch_size;
        self.max_batch_delay = max_batch_delay;
        self.min_workers = min_workers;
        self.max_workers = max_workers;
        self.response_timeout = response_timeout;
        self.batching_overridden = true;
        self
    }

    /// Set the number of workers per model.
    pub fn with_model_server_workers(mut self, workers: u32) -> Self {
        self.model_server_workers = Some(workers);
        self
    }
}

/// `<model_dir>/code`, where user handler code lives.
pub fn code_dir(model_dir: &Path) -> PathBuf {
    model_dir.join("code")
}

/// `SAGEMAKER_PROGRAM` may name a script file; the module is its stem.
fn normalize_module_name(program: &str) -> String {
    let program = program.trim();
    match Path::new(program).file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => DEFAULT_MODULE_NAME.to_string(),
    }
}

fn parse_var<T: FromStr>(
    var: &'static str,
    default: T,
    reason: &'static str,
) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(var, reason)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

/// Serializes every test in the crate that modifies environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 12] = [
        DEFAULT_INVOCATIONS_ACCEPT_ENV,
        MODEL_SERVER_TIMEOUT_ENV,
        MODEL_SERVER_WORKERS_ENV,
        BIND_TO_PORT_ENV,
        MANAGEMENT_PORT_ENV,
        BATCH_SIZE_ENV,
        MAX_BATCH_DELAY_ENV,
        MIN_WORKERS_ENV,
        MAX_WORKERS_ENV,
        RESPONSE_TIMEOUT_ENV,
        PROGRAM_ENV,
        MODEL_DIR_ENV,
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        /// Start from a clean slate: every variable the snapshot reads is unset.
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for var in ALL_VARS {
                guard.remove(var);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_environment_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let environment = Environment::from_env().unwrap();

        assert_eq!(environment, Environment::default());
        assert_eq!(environment.default_accept, "application/json");
        assert_eq!(environment.model_server_timeout, 60);
        assert_eq!(environment.model_server_workers, None);
        assert_eq!(environment.inference_http_port, 8080);
        assert_eq!(environment.management_http_port, 8081);
        assert_eq!(environment.batch_size, 1);
        assert_eq!(environment.max_batch_delay, 100);
        assert_eq!(environment.min_workers, 1);
        assert_eq!(environment.max_workers, 1);
        assert_eq!(environment.response_timeout, 60);
        assert_eq!(environment.module_name, "inference");
        assert_eq!(environment.model_dir, PathBuf::from("/opt/ml/model"));
        assert!(!environment.batching_overridden());
    }

    #[test]
    fn test_environment_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set(DEFAULT_INVOCATIONS_ACCEPT_ENV, "text/csv");
        guard.set(MODEL_SERVER_TIMEOUT_ENV, "120");
        guard.set(MODEL_SERVER_WORKERS_ENV, "4");
        guard.set(BIND_TO_PORT_ENV, "9000");
        guard.set(MANAGEMENT_PORT_ENV, "9001");
        guard.set(PROGRAM_ENV, "handler.py");
        guard.set(MODEL_DIR_ENV, "/models/resnet");

        let environment = Environment::from_env().unwrap();

        assert_eq!(environment.default_accept, "text/csv");
        assert_eq!(environment.model_server_timeout, 120);
        assert_eq!(environment.model_server_workers, Some(4));
        assert_eq!(environment.inference_http_port, 9000);
        assert_eq!(environment.management_http_port, 9001);
        assert_eq!(environment.module_name, "handler");
        assert_eq!(environment.code_dir(), PathBuf::from("/models/resnet/code"));
        assert!(!environment.batching_overridden());
    }

    #[test]
    fn test_environment_batching_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set(BATCH_SIZE_ENV, "8");
        guard.set(MAX_BATCH_DELAY_ENV, "50");
        guard.set(MIN_WORKERS_ENV, "2");
        guard.set(MAX_WORKERS_ENV, "6");
        guard.set(RESPONSE_TIMEOUT_ENV, "30");

        let environment = Environment::from_env().unwrap();

        assert_eq!(environment.batch_size, 8);
        assert_eq!(environment.max_batch_delay, 50);
        assert_eq!(environment.min_workers, 2);
        assert_eq!(environment.max_workers, 6);
        assert_eq!(environment.response_timeout, 30);
        assert!(environment.batching_overridden());
    }

    #[test]
    fn test_single_batching_var_marks_override() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set(MAX_WORKERS_ENV, "3");

        let environment = Environment::from_env().unwrap();
        assert!(environment.batching_overridden());
        assert_eq!(environment.batch_size, 1);
        assert_eq!(environment.max_workers, 3);
    }

    #[test]
    fn test_invalid_batch_size() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set(BATCH_SIZE_ENV, "eight");

        let err = Environment::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(BATCH_SIZE_ENV, _)));
        assert!(err.to_string().contains("SAGEMAKER_TS_BATCH_SIZE"));
    }

    #[test]
    fn test_invalid_port_out_of_range() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set(BIND_TO_PORT_ENV, "99999"); // > 65535

        let err = Environment::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(BIND_TO_PORT_ENV, _)));
    }

    #[test]
    fn test_invalid_workers() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set(MODEL_SERVER_WORKERS_ENV, "-1");

        let err = Environment::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(MODEL_SERVER_WORKERS_ENV, _)
        ));
    }

    #[test]
    fn test_builder_methods() {
        let environment = Environment::default()
            .with_default_accept("application/x-npy")
            .with_module_name("custom")
            .with_model_dir("/tmp/model")
            .with_model_server_workers(2)
            .with_batching(4, 10, 1, 2, 15);

        assert_eq!(environment.default_accept, "application/x-npy");
        assert_eq!(environment.module_name, "custom");
        assert_eq!(environment.code_dir(), PathBuf::from("/tmp/model/code"));
        assert_eq!(environment.model_server_workers, Some(2));
        assert_eq!(environment.batch_size, 4);
        assert!(environment.batching_overridden());
    }

    #[test]
    fn test_normalize_module_name() {
        assert_eq!(normalize_module_name("inference.py"), "inference");
        assert_eq!(normalize_module_name("mnist"), "mnist");
        assert_eq!(normalize_module_name(""), "inference");
    }

    #[test]
    fn test_config_error_display() {
        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
