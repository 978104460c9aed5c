// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handler slots and handler modules.
//!
//! Every pipeline stage has its own slot type (e.g. [`InputFn`]). A slot holds
//! one of two calling conventions, fixed when the function is bound:
//!
//! - context-free: the stage arguments only
//! - context-aware: the stage arguments followed by the request [`Context`]
//!
//! Plain functions and closures of either shape convert into a slot through
//! the `Into*Fn` traits, so a [`HandlerModule`] can be assembled directly from
//! `fn` items:
//!
//! ```
//! use std::path::Path;
//! use modelserve_toolkit::{Context, Data, HandlerModule, HandlerResult, Model, Payload};
//!
//! fn model_fn(_model_dir: &Path) -> HandlerResult<Model> {
//!     Ok(Model::new("model"))
//! }
//!
//! fn input_fn(payload: Payload, _content_type: &str, context: &Context) -> HandlerResult<Data> {
//!     let _gpu = context.gpu_id();
//!     Ok(payload.into())
//! }
//!
//! let module = HandlerModule::new()
//!     .with_model_fn(model_fn)
//!     .with_input_fn(input_fn);
//!
//! assert!(!module.model_fn.as_ref().unwrap().takes_context());
//! assert!(module.input_fn.as_ref().unwrap().takes_context());
//! ```
//!
//! A function matching neither shape is rejected when it is bound:
//!
//! ```compile_fail
//! use modelserve_toolkit::{Data, HandlerModule, HandlerResult, Payload};
//!
//! fn input_fn(payload: Payload) -> HandlerResult<Data> {
//!     Ok(payload.into())
//! }
//!
//! let _ = HandlerModule::new().with_input_fn(input_fn);
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::context::Context;
use crate::error::HandlerResult;
use crate::types::{Data, Model, Output, Payload};

/// Pipeline stages a handler can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ModelLoad,
    PreModel,
    Warmup,
    Input,
    Predict,
    Output,
    Transform,
}

impl Stage {
    /// Handler name as written in a handler module.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::ModelLoad => "model_fn",
            Stage::PreModel => "pre_model_fn",
            Stage::Warmup => "model_warmup_fn",
            Stage::Input => "input_fn",
            Stage::Predict => "predict_fn",
            Stage::Output => "output_fn",
            Stage::Transform => "transform_fn",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Marker types selecting the calling convention of a bound function.
pub mod signature {
    /// Function takes the stage arguments only.
    pub struct ContextFree;
    /// Function takes the stage arguments and the request context.
    pub struct ContextAware;
}

macro_rules! handler_slot {
    (
        $(#[$meta:meta])*
        $slot:ident, $into:ident, $stage:expr, ($($arg:ident: $ty:ty),*) -> $ret:ty
    ) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub enum $slot {
            ContextFree(Arc<dyn Fn($($ty),*) -> HandlerResult<$ret> + Send + Sync>),
            ContextAware(Arc<dyn Fn($($ty,)* &Context) -> HandlerResult<$ret> + Send + Sync>),
        }

        impl $slot {
            pub const STAGE: Stage = $stage;

            pub fn context_free<F>(f: F) -> Self
            where
                F: Fn($($ty),*) -> HandlerResult<$ret> + Send + Sync + 'static,
            {
                Self::ContextFree(Arc::new(f))
            }

            pub fn context_aware<F>(f: F) -> Self
            where
                F: Fn($($ty,)* &Context) -> HandlerResult<$ret> + Send + Sync + 'static,
            {
                Self::ContextAware(Arc::new(f))
            }

            pub fn takes_context(&self) -> bool {
                matches!(self, Self::ContextAware(_))
            }

            /// Invoke the handler; `context` is passed only to context-aware functions.
            pub fn call(&self, $($arg: $ty,)* context: &Context) -> HandlerResult<$ret> {
                match self {
                    Self::ContextFree(f) => f($($arg),*),
                    Self::ContextAware(f) => f($($arg,)* context),
                }
            }
        }

        impl fmt::Debug for $slot {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let convention = if self.takes_context() { "context-aware" } else { "context-free" };
                f.debug_tuple(stringify!($slot)).field(&convention).finish()
            }
        }

        #[doc = concat!("Conversion into a [`", stringify!($slot), "`].")]
        pub trait $into<M> {
            fn into_handler(self) -> $slot;
        }

        impl $into<$slot> for $slot {
            fn into_handler(self) -> $slot {
                self
            }
        }

        impl<F> $into<signature::ContextFree> for F
        where
            F: Fn($($ty),*) -> HandlerResult<$ret> + Send + Sync + 'static,
        {
            fn into_handler(self) -> $slot {
                $slot::context_free(self)
            }
        }

        impl<F> $into<signature::ContextAware> for F
        where
            F: Fn($($ty,)* &Context) -> HandlerResult<$ret> + Send + Sync + 'static,
        {
            fn into_handler(self) -> $slot {
                $slot::context_aware(self)
            }
        }
    };
}

handler_slot! {
    /// Loads the model from the model directory.
    ModelFn, IntoModelFn, Stage::ModelLoad, (model_dir: &Path) -> Model
}

handler_slot! {
    /// Runs before the model is loaded.
    PreModelFn, IntoPreModelFn, Stage::PreModel, (model_dir: &Path) -> ()
}

handler_slot! {
    /// Runs once after the model is loaded.
    WarmupFn, IntoWarmupFn, Stage::Warmup, (model_dir: &Path, model: &Model) -> ()
}

handler_slot! {
    /// Deserializes a request body.
    InputFn, IntoInputFn, Stage::Input, (payload: Payload, content_type: &str) -> Data
}

handler_slot! {
    /// Runs inference on deserialized input.
    PredictFn, IntoPredictFn, Stage::Predict, (data: Data, model: &Model) -> Data
}

handler_slot! {
    /// Serializes a prediction for the resolved accept.
    OutputFn, IntoOutputFn, Stage::Output, (prediction: Data, accept: &str) -> Output
}

handler_slot! {
    /// Replaces the input/predict/output chain with a single function.
    TransformFn, IntoTransformFn, Stage::Transform,
    (model: &Model, payload: Payload, content_type: &str, accept: &str) -> Output
}

/// The handler functions a module defines. Any slot may be empty.
#[derive(Debug, Clone, Default)]
pub struct HandlerModule {
    pub model_fn: Option<ModelFn>,
    pub pre_model_fn: Option<PreModelFn>,
    pub model_warmup_fn: Option<WarmupFn>,
    pub input_fn: Option<InputFn>,
    pub predict_fn: Option<PredictFn>,
    pub output_fn: Option<OutputFn>,
    pub transform_fn: Option<TransformFn>,
}

impl HandlerModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_fn<M>(mut self, f: impl IntoModelFn<M>) -> Self {
        self.model_fn = Some(f.into_handler());
        self
    }

    pub fn with_pre_model_fn<M>(mut self, f: impl IntoPreModelFn<M>) -> Self {
        self.pre_model_fn = Some(f.into_handler());
        self
    }

    pub fn with_model_warmup_fn<M>(mut self, f: impl IntoWarmupFn<M>) -> Self {
        self.model_warmup_fn = Some(f.into_handler());
        self
    }

    pub fn with_input_fn<M>(mut self, f: impl IntoInputFn<M>) -> Self {
        self.input_fn = Some(f.into_handler());
        self
    }

    pub fn with_predict_fn<M>(mut self, f: impl IntoPredictFn<M>) -> Self {
        self.predict_fn = Some(f.into_handler());
        self
    }

    pub fn with_output_fn<M>(mut self, f: impl IntoOutputFn<M>) -> Self {
        self.output_fn = Some(f.into_handler());
        self
    }

    pub fn with_transform_fn<M>(mut self, f: impl IntoTransformFn<M>) -> Self {
        self.transform_fn = Some(f.into_handler());
        self
    }

    /// Stages this module defines a handler for, in pipeline order.
    pub fn defined(&self) -> Vec<Stage> {
        [
            (Stage::PreModel, self.pre_model_fn.is_some()),
            (Stage::ModelLoad, self.model_fn.is_some()),
            (Stage::Warmup, self.model_warmup_fn.is_some()),
            (Stage::Transform, self.transform_fn.is_some()),
            (Stage::Input, self.input_fn.is_some()),
            (Stage::Predict, self.predict_fn.is_some()),
            (Stage::Output, self.output_fn.is_some()),
        ]
        .into_iter()
        .filter_map(|(stage, defined)| defined.then_some(stage))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.defined().is_empty()
    }

    /// Whether any of `input_fn`, `predict_fn` or `output_fn` is defined.
    pub fn defines_composed(&self) -> bool {
        self.input_fn.is_some() || self.predict_fn.is_some() || self.output_fn.is_some()
    }
}
