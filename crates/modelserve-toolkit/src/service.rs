// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entry points called by the serving runtime.
//!
//! In single-model mode the service owns one [`Transformer`]. In multi-model
//! mode it keeps one per model directory, each searching only its own
//! `<model_dir>/code` for user modules, so two models may ship handler modules
//! with the same name.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use tracing::info;

use crate::context::Context;
use crate::defaults::DefaultInferenceHandler;
use crate::environment::Environment;
use crate::error::InitError;
use crate::handler::HandlerModule;
use crate::resolver::ModuleLoader;
use crate::response::Response;
use crate::transformer::Transformer;
use crate::types::RequestItem;

pub const MULTI_MODEL_ENV: &str = "SAGEMAKER_MULTI_MODEL";

/// Service-level switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Serve several models from one process
    pub multi_model: bool,
}

impl ServiceConfig {
    /// Read `SAGEMAKER_MULTI_MODEL`; only `true` (any case) enables it.
    pub fn from_env() -> Self {
        let multi_model = env::var(MULTI_MODEL_ENV)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self { multi_model }
    }

    pub fn with_multi_model(mut self, multi_model: bool) -> Self {
        self.multi_model = multi_model;
        self
    }
}

/// Adapter between the serving runtime and the transformers.
pub struct HandlerService {
    config: ServiceConfig,
    loader: Arc<dyn ModuleLoader>,
    defaults: HandlerModule,
    environment: Option<Environment>,
    single: OnceCell<Arc<Transformer>>,
    per_model: Mutex<HashMap<Option<PathBuf>, Arc<Transformer>>>,
}

impl HandlerService {
    pub fn new(config: ServiceConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            config,
            loader,
            defaults: DefaultInferenceHandler::module(),
            environment: None,
            single: OnceCell::new(),
            per_model: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the default handler layer.
    pub fn with_defaults(mut self, defaults: HandlerModule) -> Self {
        self.defaults = defaults;
        self
    }

    /// Use a fixed environment instead of reading the process environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Initialize the transformer serving `context`'s model.
    ///
    /// An error here means the worker cannot serve this model.
    pub fn initialize(&self, context: &Context) -> Result<(), InitError> {
        self.transformer_for(context).validate_and_initialize(None, context)
    }

    /// Serve one request batch.
    pub fn handle(&self, data: &[RequestItem], context: &Context) -> Response {
        self.transformer_for(context).transform(data, context)
    }

    /// Transformer already created for `model_dir`.
    ///
    /// In single-model mode `model_dir` is ignored.
    pub fn transformer(&self, model_dir: Option<&Path>) -> Option<Arc<Transformer>> {
        if !self.config.multi_model {
            return self.single.get().cloned();
        }
        let key = model_dir.map(Path::to_path_buf);
        self.models().get(&key).cloned()
    }

    /// Number of transformers created so far.
    pub fn transformer_count(&self) -> usize {
        if self.config.multi_model {
            self.models().len()
        } else {
            usize::from(self.single.get().is_some())
        }
    }

    fn transformer_for(&self, context: &Context) -> Arc<Transformer> {
        if !self.config.multi_model {
            return self
                .single
                .get_or_init(|| Arc::new(self.build_transformer(None)))
                .clone();
        }

        let key = context.model_dir().map(Path::to_path_buf);
        self.models()
            .entry(key)
            .or_insert_with_key(|key| {
                info!(
                    model_dir = ?key,
                    model_name = ?context.model_name(),
                    "Creating transformer for model"
                );
                Arc::new(self.build_transformer(key.as_deref()))
            })
            .clone()
    }

    fn build_transformer(&self, model_dir: Option<&Path>) -> Transformer {
        let mut builder = Transformer::builder()
            .loader(self.loader.clone())
            .defaults(self.defaults.clone());
        if let Some(environment) = &self.environment {
            builder = builder.environment(environment.clone());
        }
        if let Some(model_dir) = model_dir {
            builder = builder.model_dir(model_dir);
        }
        builder.build()
    }

    fn models(&self) -> std::sync::MutexGuard<'_, HashMap<Option<PathBuf>, Arc<Transformer>>> {
        self.per_model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
