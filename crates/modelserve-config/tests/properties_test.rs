// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for properties file rendering.

use modelserve_config::{PropertiesError, render_properties, write_properties};
use modelserve_toolkit::Environment;
use tempfile::TempDir;

fn lines(properties: &str) -> Vec<&str> {
    properties.lines().filter(|l| !l.starts_with('#')).collect()
}

#[test]
fn test_default_environment() {
    let properties = render_properties(&Environment::default(), false).unwrap();
    let lines = lines(&properties);

    assert!(lines.contains(&"default_response_timeout=60"));
    assert!(lines.contains(&"inference_address=http://0.0.0.0:8080"));
    assert!(lines.contains(&"management_address=http://0.0.0.0:8081"));
    assert!(!properties.contains("default_workers_per_model"));
    assert!(!properties.contains("models="));
}

#[test]
fn test_overrides_are_rendered() {
    let mut env = Environment::default().with_model_server_workers(4);
    env.model_server_timeout = 300;
    env.inference_http_port = 9090;

    let properties = render_properties(&env, false).unwrap();
    let lines = lines(&properties);

    assert!(lines.contains(&"default_response_timeout=300"));
    assert!(lines.contains(&"default_workers_per_model=4"));
    assert!(lines.contains(&"inference_address=http://0.0.0.0:9090"));
}

#[test]
fn test_batching_adds_models_line_for_single_model_only() {
    let env = Environment::default().with_batching(8, 200, 1, 2, 30);

    let single = render_properties(&env, false).unwrap();
    let models = single
        .lines()
        .find_map(|l| l.strip_prefix("models="))
        .expect("models line");
    let value: serde_json::Value = serde_json::from_str(models).unwrap();
    let version = &value["model"]["1.0"];
    assert_eq!(version["batchSize"], 8);
    assert_eq!(version["maxBatchDelay"], 200);
    assert_eq!(version["maxWorkers"], 2);
    assert_eq!(version["responseTimeout"], 30);
    assert_eq!(version["marName"], "model.mar");
    assert_eq!(version["defaultVersion"], true);

    let multi = render_properties(&env, true).unwrap();
    assert!(!multi.contains("models="));
}

#[test]
fn test_write_properties() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ts.properties");

    let written = write_properties(&path, &Environment::default(), false).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), written);
}

#[test]
fn test_write_to_missing_directory_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("ts.properties");

    let err = write_properties(&path, &Environment::default(), false).unwrap_err();
    assert!(matches!(err, PropertiesError::Write { .. }));
    assert!(err.to_string().contains("ts.properties"));
}
