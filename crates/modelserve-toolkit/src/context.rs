// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-request metadata handed through the pipeline.

use std::collections::HashMap;
use std::path::Path;

/// System property naming the model directory.
pub const MODEL_DIR_PROPERTY: &str = "model_dir";
/// System property naming the accelerator assigned to the worker.
pub const GPU_ID_PROPERTY: &str = "gpu_id";
/// System property naming the target model in multi-model mode.
pub const MODEL_NAME_PROPERTY: &str = "model_name";

pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const ACCEPT_HEADER: &str = "Accept";

/// Request-scoped headers for one item of a batch.
///
/// Lookups ignore header-name case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestProperties {
    headers: Vec<(String, String)>,
}

impl RequestProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, replacing any existing one with the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add a header, replacing any existing one with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Header value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE_HEADER)
    }

    pub fn accept(&self) -> Option<&str> {
        self.get(ACCEPT_HEADER)
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RequestProperties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Self::new();
        for (name, value) in iter {
            properties.insert(name, value);
        }
        properties
    }
}

/// Metadata for one request: worker system properties plus one
/// [`RequestProperties`] per item in the batch.
#[derive(Debug, Clone, Default)]
pub struct Context {
    system_properties: HashMap<String, String>,
    request_properties: Vec<RequestProperties>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a system property.
    pub fn with_system_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.system_properties.insert(key.into(), value.into());
        self
    }

    /// Set the model directory.
    pub fn with_model_dir(self, model_dir: impl AsRef<Path>) -> Self {
        let dir = model_dir.as_ref().to_string_lossy().into_owned();
        self.with_system_property(MODEL_DIR_PROPERTY, dir)
    }

    /// Append the properties of the next batch item.
    pub fn with_request(mut self, properties: RequestProperties) -> Self {
        self.request_properties.push(properties);
        self
    }

    pub fn system_property(&self, key: &str) -> Option<&str> {
        self.system_properties.get(key).map(String::as_str)
    }

    pub fn system_properties(&self) -> &HashMap<String, String> {
        &self.system_properties
    }

    pub fn model_dir(&self) -> Option<&Path> {
        self.system_property(MODEL_DIR_PROPERTY).map(Path::new)
    }

    /// Accelerator index, if the runtime assigned one.
    pub fn gpu_id(&self) -> Option<u32> {
        self.system_property(GPU_ID_PROPERTY)
            .and_then(|id| id.trim().parse().ok())
    }

    pub fn model_name(&self) -> Option<&str> {
        self.system_property(MODEL_NAME_PROPERTY)
    }

    /// Properties of batch item `index`.
    pub fn request_properties(&self, index: usize) -> Option<&RequestProperties> {
        self.request_properties.get(index)
    }

    pub fn request_count(&self) -> usize {
        self.request_properties.len()
    }
}
