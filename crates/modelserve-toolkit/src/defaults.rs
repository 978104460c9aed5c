// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Framework default handlers.

use crate::codec;
use crate::content_types;
use crate::error::HandlerResult;
use crate::handler::HandlerModule;
use crate::types::{Data, Model, Output, Payload};

/// Default `input_fn`, `predict_fn` and `output_fn`.
///
/// There is no default `model_fn`: the framework cannot know how to load an
/// arbitrary model, so either the user module or an extended default layer
/// must supply one.
pub struct DefaultInferenceHandler;

impl DefaultInferenceHandler {
    /// The default handler layer.
    pub fn module() -> HandlerModule {
        HandlerModule::new()
            .with_input_fn(Self::input_fn)
            .with_predict_fn(Self::predict_fn)
            .with_output_fn(Self::output_fn)
    }

    /// Decode by content type. Octet streams pass through as bytes.
    pub fn input_fn(payload: Payload, content_type: &str) -> HandlerResult<Data> {
        if content_type.is_empty() || content_types::matches(content_type, content_types::OCTET_STREAM)
        {
            return Ok(payload.into());
        }
        Ok(codec::decode(&payload, content_type)?)
    }

    /// Call the model's predictor, or pass the data through if it has none.
    pub fn predict_fn(data: Data, model: &Model) -> HandlerResult<Data> {
        match model.predictor() {
            Some(predictor) => predictor.predict(data),
            None => Ok(data),
        }
    }

    /// Encode for the accept. Raw text and bytes are returned unchanged.
    pub fn output_fn(prediction: Data, accept: &str) -> HandlerResult<Output> {
        match prediction {
            Data::Bytes(bytes) => Ok(Output::Body(bytes)),
            Data::Text(text) => Ok(Output::from(text)),
            data => Ok(Output::Body(codec::encode(&data, accept)?)),
        }
    }
}
