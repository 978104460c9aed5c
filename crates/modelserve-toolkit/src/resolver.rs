// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Locating user handler modules and binding pipeline stages.
//!
//! A [`ModuleLoader`] finds the user module for a model. [`HandlerResolver`]
//! then layers it over the framework defaults and validates the result:
//!
//! 1. A user `transform_fn` wins, and may not be combined with any user
//!    `input_fn`, `predict_fn` or `output_fn`.
//! 2. If the user defines any of `input_fn`, `predict_fn` or `output_fn`, the
//!    three are composed, each falling back to its default.
//! 3. Otherwise a default `transform_fn` is used if there is one, else the
//!    three default stages are composed.
//!
//! `model_fn`, `pre_model_fn` and `model_warmup_fn` bind user-first, then
//! default. Only `model_fn` is mandatory.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::handler::{
    HandlerModule, InputFn, ModelFn, OutputFn, PredictFn, PreModelFn, Stage, TransformFn, WarmupFn,
};

/// Finds a handler module by name.
pub trait ModuleLoader: Send + Sync {
    /// Look up `module_name`, consulting `search_path` in order.
    ///
    /// Returns `None` when no such module exists.
    fn load(&self, module_name: &str, search_path: &[PathBuf]) -> Option<HandlerModule>;
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    name: String,
    scope: Option<PathBuf>,
    module: HandlerModule,
}

/// In-process table of handler modules.
///
/// A module is registered either for one code directory or for every search
/// path. Scoped entries win over unscoped ones, and among scoped entries the
/// first matching search path element wins.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    entries: Vec<RegistryEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module visible from any search path.
    pub fn register(&mut self, name: impl Into<String>, module: HandlerModule) -> &mut Self {
        self.insert(name.into(), None, module);
        self
    }

    /// Register a module visible only when `code_dir` is on the search path.
    pub fn register_in(
        &mut self,
        code_dir: impl Into<PathBuf>,
        name: impl Into<String>,
        module: HandlerModule,
    ) -> &mut Self {
        self.insert(name.into(), Some(code_dir.into()), module);
        self
    }

    pub fn with_module(mut self, name: impl Into<String>, module: HandlerModule) -> Self {
        self.register(name, module);
        self
    }

    pub fn with_module_in(
        mut self,
        code_dir: impl Into<PathBuf>,
        name: impl Into<String>,
        module: HandlerModule,
    ) -> Self {
        self.register_in(code_dir, name, module);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: String, scope: Option<PathBuf>, module: HandlerModule) {
        // Same name and scope replaces the earlier registration
        self.entries.retain(|e| !(e.name == name && e.scope == scope));
        self.entries.push(RegistryEntry { name, scope, module });
    }

    fn find(&self, name: &str, scope: Option<&Path>) -> Option<&HandlerModule> {
        self.entries
            .iter()
            .find(|e| e.name == name && e.scope.as_deref() == scope)
            .map(|e| &e.module)
    }
}

impl ModuleLoader for ModuleRegistry {
    fn load(&self, module_name: &str, search_path: &[PathBuf]) -> Option<HandlerModule> {
        search_path
            .iter()
            .find_map(|dir| self.find(module_name, Some(dir.as_path())))
            .or_else(|| self.find(module_name, None))
            .cloned()
    }
}

/// Binding validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// `transform_fn` defined together with a composed stage.
    #[error(
        "module {module} defines transform_fn together with {}; define either transform_fn \
         or input_fn/predict_fn/output_fn",
        stage_list(.conflicting)
    )]
    AmbiguousPipeline { module: String, conflicting: Vec<Stage> },

    /// Neither the user module nor the defaults provide `model_fn`.
    #[error("no model_fn found in module {module} or in the default handlers")]
    MissingModelFn { module: String },

    /// A composed pipeline stage has no handler in either layer.
    #[error("no handler bound for {}", stage_list(.missing))]
    IncompletePipeline { missing: Vec<Stage> },
}

fn stage_list(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(Stage::name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// How a request is turned into a response.
#[derive(Debug, Clone)]
pub enum Pipeline {
    /// A single `transform_fn`.
    Custom(TransformFn),
    /// `input_fn`, then `predict_fn`, then `output_fn`.
    Composed {
        input_fn: InputFn,
        predict_fn: PredictFn,
        output_fn: OutputFn,
    },
}

/// Validated handler set for one model.
#[derive(Debug, Clone)]
pub struct Bindings {
    pub model_fn: ModelFn,
    pub pre_model_fn: Option<PreModelFn>,
    pub model_warmup_fn: Option<WarmupFn>,
    pub pipeline: Pipeline,
}

/// Locates the user module and binds it over the default layer.
pub struct HandlerResolver<'a> {
    loader: &'a dyn ModuleLoader,
    module_name: &'a str,
}

impl<'a> HandlerResolver<'a> {
    pub fn new(loader: &'a dyn ModuleLoader, module_name: &'a str) -> Self {
        Self {
            loader,
            module_name,
        }
    }

    /// Find the user module on `search_path` and bind it over `defaults`.
    pub fn resolve(
        &self,
        search_path: &[PathBuf],
        defaults: &HandlerModule,
    ) -> Result<Bindings, ValidationError> {
        let user = self.loader.load(self.module_name, search_path);
        match &user {
            Some(module) => info!(
                module = self.module_name,
                defined = %stage_list(&module.defined()),
                "Located user handler module"
            ),
            None => info!(
                module = self.module_name,
                search_path = ?search_path,
                "No user handler module found, using default handlers"
            ),
        }
        self.bind(user.as_ref(), defaults)
    }

    /// Layer `user` over `defaults` and validate the result.
    pub fn bind(
        &self,
        user: Option<&HandlerModule>,
        defaults: &HandlerModule,
    ) -> Result<Bindings, ValidationError> {
        let empty = HandlerModule::default();
        let user = user.unwrap_or(&empty);

        let pipeline = match &user.transform_fn {
            Some(transform_fn) => {
                let conflicting: Vec<Stage> = user
                    .defined()
                    .into_iter()
                    .filter(|s| matches!(s, Stage::Input | Stage::Predict | Stage::Output))
                    .collect();
                if !conflicting.is_empty() {
                    return Err(ValidationError::AmbiguousPipeline {
                        module: self.module_name.to_string(),
                        conflicting,
                    });
                }
                Pipeline::Custom(transform_fn.clone())
            }
            None if user.defines_composed() => compose(user, defaults)?,
            None => match &defaults.transform_fn {
                Some(transform_fn) => Pipeline::Custom(transform_fn.clone()),
                None => compose(user, defaults)?,
            },
        };

        let model_fn = user
            .model_fn
            .clone()
            .or_else(|| defaults.model_fn.clone())
            .ok_or_else(|| ValidationError::MissingModelFn {
                module: self.module_name.to_string(),
            })?;

        let bindings = Bindings {
            model_fn,
            pre_model_fn: user
                .pre_model_fn
                .clone()
                .or_else(|| defaults.pre_model_fn.clone()),
            model_warmup_fn: user
                .model_warmup_fn
                .clone()
                .or_else(|| defaults.model_warmup_fn.clone()),
            pipeline,
        };
        debug!(module = self.module_name, pipeline = ?bindings.pipeline, "Handlers bound");
        Ok(bindings)
    }
}

fn compose(user: &HandlerModule, defaults: &HandlerModule) -> Result<Pipeline, ValidationError> {
    let input_fn = user.input_fn.clone().or_else(|| defaults.input_fn.clone());
    let predict_fn = user.predict_fn.clone().or_else(|| defaults.predict_fn.clone());
    let output_fn = user.output_fn.clone().or_else(|| defaults.output_fn.clone());

    match (input_fn, predict_fn, output_fn) {
        (Some(input_fn), Some(predict_fn), Some(output_fn)) => Ok(Pipeline::Composed {
            input_fn,
            predict_fn,
            output_fn,
        }),
        (input_fn, predict_fn, output_fn) => {
            let missing = [
                (Stage::Input, input_fn.is_none()),
                (Stage::Predict, predict_fn.is_none()),
                (Stage::Output, output_fn.is_none()),
            ]
            .into_iter()
            .filter_map(|(stage, missing)| missing.then_some(stage))
            .collect();
            Err(ValidationError::IncompletePipeline { missing })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Data, Model, Output};

    fn model_fn(_: &Path) -> crate::HandlerResult<Model> {
        Ok(Model::new("model"))
    }

    fn predict_fn(data: Data, _: &Model) -> crate::HandlerResult<Data> {
        Ok(data)
    }

    fn defaults() -> HandlerModule {
        HandlerModule::new()
            .with_input_fn(InputFn::context_free(|p, _| Ok(p.into())))
            .with_predict_fn(predict_fn)
            .with_output_fn(OutputFn::context_free(|_, _| Ok(Output::from("default"))))
    }

    fn transform() -> TransformFn {
        TransformFn::context_free(|_, _, _, _| Ok(Output::from("custom")))
    }

    #[test]
    fn test_registry_scoped_lookup_order() {
        let registry = ModuleRegistry::new()
            .with_module("inference", HandlerModule::new().with_transform_fn(transform()))
            .with_module_in("/b/code", "inference", HandlerModule::new().with_model_fn(model_fn))
            .with_module_in("/a/code", "inference", HandlerModule::new().with_predict_fn(predict_fn));

        let path = vec![PathBuf::from("/a/code"), PathBuf::from("/b/code")];
        let module = registry.load("inference", &path).unwrap();
        assert_eq!(module.defined(), vec![Stage::Predict]);

        let module = registry.load("inference", &[PathBuf::from("/b/code")]).unwrap();
        assert_eq!(module.defined(), vec![Stage::ModelLoad]);

        let module = registry.load("inference", &[PathBuf::from("/c/code")]).unwrap();
        assert_eq!(module.defined(), vec![Stage::Transform]);

        assert!(registry.load("other", &path).is_none());
    }

    #[test]
    fn test_registry_replaces_same_scope() {
        let mut registry = ModuleRegistry::new();
        registry
            .register("inference", HandlerModule::new())
            .register("inference", HandlerModule::new().with_model_fn(model_fn));
        assert_eq!(registry.len(), 1);
        assert!(registry.load("inference", &[]).unwrap().model_fn.is_some());
    }

    #[test]
    fn test_user_transform_wins() {
        let registry = ModuleRegistry::new();
        let resolver = HandlerResolver::new(&registry, "inference");
        let user = HandlerModule::new().with_model_fn(model_fn).with_transform_fn(transform());

        let bindings = resolver.bind(Some(&user), &defaults()).unwrap();
        assert!(matches!(bindings.pipeline, Pipeline::Custom(_)));
    }

    #[test]
    fn test_ambiguous_pipeline_rejected() {
        let registry = ModuleRegistry::new();
        let resolver = HandlerResolver::new(&registry, "inference");
        let user = HandlerModule::new()
            .with_model_fn(model_fn)
            .with_transform_fn(transform())
            .with_predict_fn(predict_fn);

        let err = resolver.bind(Some(&user), &defaults()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::AmbiguousPipeline {
                module: "inference".to_string(),
                conflicting: vec![Stage::Predict],
            }
        );
        assert!(err.to_string().contains("transform_fn together with predict_fn"));
    }

    #[test]
    fn test_missing_model_fn() {
        let registry = ModuleRegistry::new();
        let resolver = HandlerResolver::new(&registry, "inference");
        let err = resolver.bind(None, &defaults()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingModelFn { .. }));
    }

    #[test]
    fn test_composed_falls_back_per_stage() {
        let registry = ModuleRegistry::new();
        let resolver = HandlerResolver::new(&registry, "inference");
        let user = HandlerModule::new()
            .with_model_fn(model_fn)
            .with_predict_fn(PredictFn::context_aware(|d, _, _| Ok(d)));

        let bindings = resolver.bind(Some(&user), &defaults()).unwrap();
        match bindings.pipeline {
            Pipeline::Composed {
                input_fn,
                predict_fn,
                ..
            } => {
                assert!(!input_fn.takes_context());
                assert!(predict_fn.takes_context());
            }
            other => panic!("expected composed pipeline, got {:?}", other),
        }
    }

    #[test]
    fn test_user_composed_beats_default_transform() {
        let registry = ModuleRegistry::new();
        let resolver = HandlerResolver::new(&registry, "inference");
        let defaults = defaults().with_transform_fn(transform());
        let user = HandlerModule::new().with_model_fn(model_fn).with_predict_fn(predict_fn);

        let bindings = resolver.bind(Some(&user), &defaults).unwrap();
        assert!(matches!(bindings.pipeline, Pipeline::Composed { .. }));

        let bindings = resolver
            .bind(Some(&HandlerModule::new().with_model_fn(model_fn)), &defaults)
            .unwrap();
        assert!(matches!(bindings.pipeline, Pipeline::Custom(_)));
    }

    #[test]
    fn test_incomplete_pipeline() {
        let registry = ModuleRegistry::new();
        let resolver = HandlerResolver::new(&registry, "inference");
        let user = HandlerModule::new().with_model_fn(model_fn).with_predict_fn(predict_fn);

        let err = resolver.bind(Some(&user), &HandlerModule::new()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::IncompletePipeline {
                missing: vec![Stage::Input, Stage::Output]
            }
        );
        assert_eq!(err.to_string(), "no handler bound for input_fn, output_fn");
    }

    #[test]
    fn test_resolve_uses_loader() {
        let registry = ModuleRegistry::new().with_module_in(
            "/opt/ml/model/code",
            "handler",
            HandlerModule::new().with_model_fn(model_fn),
        );
        let resolver = HandlerResolver::new(&registry, "handler");

        let bindings = resolver
            .resolve(&[PathBuf::from("/opt/ml/model/code")], &defaults())
            .unwrap();
        assert!(bindings.pre_model_fn.is_none());
        assert!(matches!(bindings.pipeline, Pipeline::Composed { .. }));

        assert!(resolver.resolve(&[], &defaults()).is_err());
    }
}
