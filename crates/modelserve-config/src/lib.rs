// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Properties file for the serving runtime.
//!
//! The file is a built-in base configuration followed by `key=value` lines
//! derived from the [`Environment`]:
//!
//! ```text
//! default_response_timeout=60
//! inference_address=http://0.0.0.0:8080
//! management_address=http://0.0.0.0:8081
//! ```
//!
//! When batching variables are set on a single-model endpoint, a `models=`
//! line carries the per-model worker and batching configuration as JSON.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use modelserve_toolkit::Environment;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Variable naming the properties file to write.
pub const TS_CONFIG_FILE_ENV: &str = "SAGEMAKER_TS_CONFIG_FILE";
pub const DEFAULT_TS_CONFIG_FILE: &str = "/etc/sagemaker-ts.properties";

/// Name of the single model served by a single-model endpoint.
pub const MODEL_NAME: &str = "model";
const MODEL_VERSION: &str = "1.0";

const DEFAULT_PROPERTIES: &str = include_str!("../etc/default-ts.properties");
const MME_PROPERTIES: &str = include_str!("../etc/mme-ts.properties");

/// Properties generation errors
#[derive(Debug, Error)]
pub enum PropertiesError {
    #[error("failed to encode model configuration: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelVersion {
    default_version: bool,
    mar_name: String,
    min_workers: u32,
    max_workers: u32,
    batch_size: u32,
    max_batch_delay: u32,
    response_timeout: u32,
}

/// Single-line JSON for the `models` property.
fn models_json(env: &Environment) -> Result<String, PropertiesError> {
    let version = ModelVersion {
        default_version: true,
        mar_name: format!("{}.mar", MODEL_NAME),
        min_workers: env.min_workers,
        max_workers: env.max_workers,
        batch_size: env.batch_size,
        max_batch_delay: env.max_batch_delay,
        response_timeout: env.response_timeout,
    };
    let models = BTreeMap::from([(MODEL_NAME, BTreeMap::from([(MODEL_VERSION, version)]))]);
    Ok(serde_json::to_string(&models)?)
}

/// Render the properties file text.
pub fn render_properties(env: &Environment, multi_model: bool) -> Result<String, PropertiesError> {
    let mut out = String::from(if multi_model {
        MME_PROPERTIES
    } else {
        DEFAULT_PROPERTIES
    });
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }

    let _ = writeln!(out, "default_response_timeout={}", env.model_server_timeout);
    if let Some(workers) = env.model_server_workers {
        let _ = writeln!(out, "default_workers_per_model={}", workers);
    }
    let _ = writeln!(out, "inference_address=http://0.0.0.0:{}", env.inference_http_port);
    let _ = writeln!(out, "management_address=http://0.0.0.0:{}", env.management_http_port);

    if env.batching_overridden() && !multi_model {
        warn!("Batching environment variables are set and will be used for the single model endpoint");
        let _ = writeln!(out, "models={}", models_json(env)?);
    }

    Ok(out)
}

/// Render the properties file and write it to `path`.
///
/// Returns the written text.
pub fn write_properties(
    path: &Path,
    env: &Environment,
    multi_model: bool,
) -> Result<String, PropertiesError> {
    let properties = render_properties(env, multi_model)?;
    fs::write(path, &properties).map_err(|source| PropertiesError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), bytes = properties.len(), "Properties file written");
    Ok(properties)
}
