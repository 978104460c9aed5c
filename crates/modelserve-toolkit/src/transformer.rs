// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The request transformation pipeline.
//!
//! A [`Transformer`] serves one model. It starts uninitialized; the first
//! successful [`validate_and_initialize`](Transformer::validate_and_initialize)
//! (called directly or by the first [`transform`](Transformer::transform))
//! binds the handlers, loads the model and moves it to the initialized state,
//! where it stays.
//!
//! Initialization runs at most once to completion. Concurrent first callers
//! block until it finishes. A failed attempt leaves the transformer
//! uninitialized so a later call can retry.
//!
//! The most recent request context is kept on the transformer and replaced by
//! every `transform` call. Callers that share one transformer across threads
//! must serialize requests themselves if they rely on [`Transformer::context`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::content_types;
use crate::context::{Context, RequestProperties};
use crate::defaults::DefaultInferenceHandler;
use crate::environment::{self, Environment};
use crate::error::{HandlerError, HandlerResult, InferenceError, InitError};
use crate::handler::{HandlerModule, Stage};
use crate::resolver::{Bindings, HandlerResolver, ModuleLoader, ModuleRegistry, Pipeline};
use crate::response::{ErrorResponse, ItemResponse, Response};
use crate::types::{Model, Payload, RequestItem};

/// Builder for a [`Transformer`].
pub struct TransformerBuilder {
    loader: Arc<dyn ModuleLoader>,
    defaults: HandlerModule,
    environment: Option<Environment>,
    search_path: Vec<PathBuf>,
    model_dir: Option<PathBuf>,
}

impl std::fmt::Debug for TransformerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerBuilder")
            .field("loader", &"...")
            .field("defaults", &self.defaults)
            .field("environment", &self.environment)
            .field("search_path", &self.search_path)
            .field("model_dir", &self.model_dir)
            .finish()
    }
}

impl Default for TransformerBuilder {
    fn default() -> Self {
        Self {
            loader: Arc::new(ModuleRegistry::new()),
            defaults: DefaultInferenceHandler::module(),
            environment: None,
            search_path: Vec::new(),
            model_dir: None,
        }
    }
}

impl TransformerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where user handler modules are looked up.
    ///
    /// Default: an empty [`ModuleRegistry`], so only the defaults are bound.
    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// The default handler layer.
    ///
    /// Default: [`DefaultInferenceHandler::module`].
    pub fn defaults(mut self, defaults: HandlerModule) -> Self {
        self.defaults = defaults;
        self
    }

    /// Use this environment instead of reading the process environment at
    /// initialization.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Add a directory to search before the model's code directory.
    pub fn search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_path.push(dir.into());
        self
    }

    /// Model directory used when neither the caller nor the request names one.
    ///
    /// Default: the environment's `model_dir`.
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Transformer {
        Transformer {
            loader: self.loader,
            defaults: self.defaults,
            environment: self.environment,
            search_path: self.search_path,
            model_dir: self.model_dir,
            state: OnceCell::new(),
            context: Mutex::new(None),
        }
    }
}

/// State fixed by a successful initialization.
struct Loaded {
    bindings: Bindings,
    environment: Environment,
    model: Model,
    model_dir: PathBuf,
}

/// Binds handlers for one model and runs requests through them.
pub struct Transformer {
    loader: Arc<dyn ModuleLoader>,
    defaults: HandlerModule,
    environment: Option<Environment>,
    search_path: Vec<PathBuf>,
    model_dir: Option<PathBuf>,
    state: OnceCell<Loaded>,
    context: Mutex<Option<Arc<Context>>>,
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer")
            .field("initialized", &self.is_initialized())
            .field("model_dir", &self.model_dir())
            .field("search_path", &self.search_path)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    pub fn builder() -> TransformerBuilder {
        TransformerBuilder::new()
    }

    /// Transformer looking up user modules in `loader`, over the default handlers.
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self::builder().loader(loader).build()
    }

    /// Bind handlers and load the model, unless already done.
    ///
    /// The model directory is `model_dir` if given, else the context's
    /// `model_dir` system property, else the configured default. Runs
    /// `pre_model_fn`, `model_fn` and `model_warmup_fn` in that order. Once
    /// this has succeeded, later calls return immediately without running any
    /// handler.
    pub fn validate_and_initialize(
        &self,
        model_dir: Option<&Path>,
        context: &Context,
    ) -> Result<(), InitError> {
        self.state
            .get_or_try_init(|| self.initialize(model_dir, context))
            .map(|_| ())
    }

    /// Run every item of a request batch through the bound pipeline.
    ///
    /// Initializes first if needed, using the context to find the model
    /// directory. Items are processed in order and independently: a failed
    /// item yields a failure entry at its position and later items still run.
    /// No error escapes; every failure is reported in the [`Response`]. A
    /// handler that panics fails its own item with status 500.
    pub fn transform(&self, data: &[RequestItem], context: &Context) -> Response {
        self.set_context(context);

        let loaded = match self
            .state
            .get_or_try_init(|| self.initialize(None, context))
        {
            Ok(loaded) => loaded,
            Err(err) => {
                error!(error = %err, "Initialization failed while serving a request");
                let err = InferenceError::from_init_error(err);
                return (0..data.len())
                    .map(|index| ItemResponse::Failure(ErrorResponse::build(index, &err)))
                    .collect();
            }
        };

        let empty = RequestProperties::new();
        data.iter()
            .enumerate()
            .map(|(index, item)| {
                let properties = context.request_properties(index).unwrap_or_else(|| {
                    warn!(index, "No request properties for item, using empty headers");
                    &empty
                });

                match guarded(|| self.transform_item(loaded, item, properties, context)) {
                    Ok((body, content_type)) => {
                        debug!(index, content_type = %content_type, bytes = body.len(), "Item transformed");
                        ItemResponse::Success { body, content_type }
                    }
                    Err(err) => {
                        let err = InferenceError::from_handler_error(err);
                        error!(
                            index,
                            status = err.status_code(),
                            toolkit = err.is_toolkit(),
                            error = %err.message(),
                            "Request item failed"
                        );
                        ItemResponse::Failure(ErrorResponse::build(index, &err))
                    }
                }
            })
            .collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// The loaded model, once initialized.
    pub fn model(&self) -> Option<&Model> {
        self.state.get().map(|loaded| &loaded.model)
    }

    /// The environment in effect, once initialized.
    pub fn environment(&self) -> Option<&Environment> {
        self.state.get().map(|loaded| &loaded.environment)
    }

    /// The model directory the model was loaded from, once initialized.
    pub fn model_dir(&self) -> Option<&Path> {
        self.state.get().map(|loaded| loaded.model_dir.as_path())
    }

    /// Context of the most recent `transform` call.
    pub fn context(&self) -> Option<Arc<Context>> {
        match self.context.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_context(&self, context: &Context) {
        let context = Some(Arc::new(context.clone()));
        match self.context.lock() {
            Ok(mut guard) => *guard = context,
            Err(poisoned) => *poisoned.into_inner() = context,
        }
    }

    fn initialize(&self, model_dir: Option<&Path>, context: &Context) -> Result<Loaded, InitError> {
        let environment = match &self.environment {
            Some(environment) => environment.clone(),
            None => Environment::from_env()?,
        };

        let model_dir = model_dir
            .or_else(|| context.model_dir())
            .map(Path::to_path_buf)
            .or_else(|| self.model_dir.clone())
            .unwrap_or_else(|| environment.model_dir.clone());

        let mut search_path = self.search_path.clone();
        search_path.push(environment::code_dir(&model_dir));

        info!(
            model_dir = %model_dir.display(),
            module = %environment.module_name,
            "Initializing transformer"
        );

        let resolver = HandlerResolver::new(self.loader.as_ref(), &environment.module_name);
        let bindings = resolver.resolve(&search_path, &self.defaults)?;

        if let Some(pre_model_fn) = &bindings.pre_model_fn {
            guarded(|| pre_model_fn.call(&model_dir, context))
                .map_err(|source| InitError::Handler {
                    stage: Stage::PreModel,
                    source,
                })?;
        }

        let model = guarded(|| bindings.model_fn.call(&model_dir, context))
            .map_err(|source| InitError::Handler {
                stage: Stage::ModelLoad,
                source,
            })?;
        info!(model_dir = %model_dir.display(), "Model loaded");

        if let Some(warmup_fn) = &bindings.model_warmup_fn {
            guarded(|| warmup_fn.call(&model_dir, &model, context))
                .map_err(|source| InitError::Handler {
                    stage: Stage::Warmup,
                    source,
                })?;
            info!("Model warm-up done");
        }

        Ok(Loaded {
            bindings,
            environment,
            model,
            model_dir,
        })
    }

    fn transform_item(
        &self,
        loaded: &Loaded,
        item: &RequestItem,
        properties: &RequestProperties,
        context: &Context,
    ) -> HandlerResult<(Vec<u8>, String)> {
        let content_type = properties
            .content_type()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(content_types::OCTET_STREAM);
        let accept = resolve_accept(properties.accept(), &loaded.environment.default_accept);

        let payload = if content_types::is_utf8(content_type) {
            Payload::Text(String::from_utf8(item.body.clone())?)
        } else {
            Payload::Bytes(item.body.clone())
        };

        let output = match &loaded.bindings.pipeline {
            Pipeline::Custom(transform_fn) => {
                transform_fn.call(&loaded.model, payload, content_type, accept, context)?
            }
            Pipeline::Composed {
                input_fn,
                predict_fn,
                output_fn,
            } => {
                let data = input_fn.call(payload, content_type, context)?;
                let prediction = predict_fn.call(data, &loaded.model, context)?;
                output_fn.call(prediction, accept, context)?
            }
        };

        Ok(output.into_parts(accept))
    }
}

/// Run a handler call, turning a panic into an untyped handler error.
fn guarded<T>(f: impl FnOnce() -> HandlerResult<T>) -> HandlerResult<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!(error = %message, "Handler panicked");
        Err(HandlerError::msg(format!("handler panicked: {}", message)))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Accept header if it names a type, else the default, else `*/*`.
fn resolve_accept<'a>(header: Option<&'a str>, default_accept: &'a str) -> &'a str {
    match header.map(str::trim) {
        Some(accept) if !accept.is_empty() && accept != content_types::ANY => accept,
        _ if !default_accept.is_empty() => default_accept,
        _ => content_types::ANY,
    }
}
