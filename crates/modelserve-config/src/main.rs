// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Writes the serving runtime's properties file from the environment.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, warn};

use modelserve_config::{DEFAULT_TS_CONFIG_FILE, TS_CONFIG_FILE_ENV, write_properties};
use modelserve_toolkit::{Environment, ServiceConfig};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelserve_config=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let environment = Environment::from_env().context("invalid serving environment")?;
    let service = ServiceConfig::from_env();
    let path = env::var(TS_CONFIG_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_TS_CONFIG_FILE));

    write_properties(&path, &environment, service.multi_model)?;

    info!(
        path = %path.display(),
        multi_model = service.multi_model,
        inference_port = environment.inference_http_port,
        "Serving runtime properties written"
    );
    Ok(())
}
