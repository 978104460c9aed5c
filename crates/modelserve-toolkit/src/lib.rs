// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Modelserve toolkit - request transformation pipeline for model-serving workers.
//!
//! The serving runtime calls a [`HandlerService`] with batches of opaque
//! request bodies. The service routes each batch to a [`Transformer`], which
//! binds user handler functions (falling back to framework defaults), loads
//! the model once, and runs every item through `input_fn -> predict_fn ->
//! output_fn` or a single `transform_fn`.
//!
//! # Features
//!
//! - **Handler binding**: user modules are plain structs of optional
//!   functions; each function is either context-free or context-aware, fixed
//!   when it is bound
//! - **One-time initialization**: `pre_model_fn`, `model_fn` and
//!   `model_warmup_fn` run exactly once, even under concurrent first requests
//! - **Content negotiation**: UTF-8 bodies are decoded for textual content
//!   types, and the accept header falls back to a configured default
//! - **Error taxonomy**: per-item failures become [`ToolkitError`] or
//!   [`GenericError`] responses and never abort the worker
//!
//! # Quick Start
//!
//! ```
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use modelserve_toolkit::{
//!     Context, Environment, HandlerModule, HandlerResult, HandlerService, Model,
//!     ModuleRegistry, RequestItem, RequestProperties, ServiceConfig,
//! };
//!
//! fn model_fn(_model_dir: &Path) -> HandlerResult<Model> {
//!     Ok(Model::new("model"))
//! }
//!
//! let registry = ModuleRegistry::new()
//!     .with_module("inference", HandlerModule::new().with_model_fn(model_fn));
//!
//! let service = HandlerService::new(ServiceConfig::default(), Arc::new(registry))
//!     .with_environment(Environment::default());
//!
//! let context = Context::new()
//!     .with_model_dir("/opt/ml/model")
//!     .with_request(
//!         RequestProperties::new().with_header("Content-Type", "application/octet-stream"),
//!     );
//!
//! service.initialize(&context).unwrap();
//! let response = service.handle(&[RequestItem::new(b"input".to_vec())], &context);
//!
//! assert_eq!(response.items[0].body(), b"input");
//! assert_eq!(response.items[0].content_type(), Some("application/json"));
//! ```

pub mod codec;
pub mod content_types;
mod context;
mod defaults;
pub mod environment;
mod error;
pub mod handler;
mod resolver;
mod response;
mod service;
mod transformer;
mod types;

pub use ndarray;

pub use context::{
    ACCEPT_HEADER, CONTENT_TYPE_HEADER, Context, GPU_ID_PROPERTY, MODEL_DIR_PROPERTY,
    MODEL_NAME_PROPERTY, RequestProperties,
};
pub use defaults::DefaultInferenceHandler;
pub use environment::{ConfigError, Environment};
pub use error::{
    GenericError, HandlerError, HandlerResult, InferenceError, InitError, ToolkitError, status,
};
pub use handler::{
    HandlerModule, InputFn, ModelFn, OutputFn, PreModelFn, PredictFn, Stage, TransformFn, WarmupFn,
};
pub use resolver::{
    Bindings, HandlerResolver, ModuleLoader, ModuleRegistry, Pipeline, ValidationError,
};
pub use response::{ErrorResponse, ItemResponse, Response};
pub use service::{HandlerService, MULTI_MODEL_ENV, ServiceConfig};
pub use transformer::{Transformer, TransformerBuilder};
pub use types::{Data, Model, NdArray, Output, Payload, Predictor, RequestItem};
