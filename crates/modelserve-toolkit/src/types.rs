// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Values that flow between pipeline stages.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayD, ArrayViewD, IxDyn};
use serde_json::Value;

use crate::error::{HandlerResult, ToolkitError};

/// Runs inference for the default `predict_fn`.
///
/// A model loaded with [`Model::from_predictor`] is called through this trait
/// when no user `predict_fn` is bound.
pub trait Predictor: Send + Sync {
    fn predict(&self, data: Data) -> HandlerResult<Data>;
}

/// Opaque handle to the loaded model.
///
/// Produced once by `model_fn` and shared read-only by every request.
#[derive(Clone)]
pub struct Model {
    value: Arc<dyn Any + Send + Sync>,
    predictor: Option<Arc<dyn Predictor>>,
}

impl Model {
    /// Wrap an arbitrary model value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            predictor: None,
        }
    }

    /// Wrap a model that the default `predict_fn` can call.
    pub fn from_predictor<P: Predictor + Any>(predictor: P) -> Self {
        let predictor = Arc::new(predictor);
        Self {
            value: predictor.clone(),
            predictor: Some(predictor),
        }
    }

    /// Borrow the model as `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    pub fn predictor(&self) -> Option<&dyn Predictor> {
        self.predictor.as_deref()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("predictor", &self.predictor.is_some())
            .finish_non_exhaustive()
    }
}

/// Request body as handed to `input_fn` or `transform_fn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Body of a UTF-8 content type, already decoded
    Text(String),
    /// Body of any other content type, unmodified
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

/// Dense array of numbers in standard (row-major) layout.
///
/// Wraps an [`ndarray::ArrayD`]. Every constructor produces a standard-layout
/// array, so [`values`](NdArray::values) always sees the full data.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray(ArrayD<f64>);

impl NdArray {
    /// Create an array; `values.len()` must equal the product of `shape`.
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> Result<Self, ToolkitError> {
        let expected = element_count(&shape)
            .ok_or_else(|| ToolkitError::bad_request(format!("shape {:?} too large", shape)))?;
        if expected != values.len() {
            return Err(ToolkitError::bad_request(format!(
                "array of shape {:?} needs {} values, got {}",
                shape,
                expected,
                values.len()
            )));
        }
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map(Self)
            .map_err(|e| ToolkitError::bad_request(format!("invalid array shape {:?}: {}", shape, e)))
    }

    /// One-dimensional array.
    pub fn vector(values: Vec<f64>) -> Self {
        Self(Array1::from(values).into_dyn())
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// Elements in row-major order.
    pub fn values(&self) -> &[f64] {
        self.0.as_slice().unwrap_or_default()
    }

    pub fn ndim(&self) -> usize {
        self.0.ndim()
    }

    pub fn as_array(&self) -> &ArrayD<f64> {
        &self.0
    }

    pub fn into_array(self) -> ArrayD<f64> {
        self.0
    }

    /// Nested JSON lists mirroring the shape.
    pub fn to_json(&self) -> Value {
        fn nest(view: ArrayViewD<'_, f64>) -> Value {
            if view.ndim() == 0 {
                return view.iter().next().copied().map(Value::from).unwrap_or(Value::Null);
            }
            Value::Array(view.outer_iter().map(nest).collect())
        }
        nest(self.0.view())
    }

    /// Parse nested JSON lists of numbers. Returns `None` for ragged or
    /// non-numeric input.
    pub fn from_json(value: &Value) -> Option<Self> {
        fn walk(value: &Value, depth: usize, shape: &mut Vec<usize>, out: &mut Vec<f64>) -> bool {
            match value {
                Value::Number(n) => {
                    if depth != shape.len() {
                        return false;
                    }
                    match n.as_f64() {
                        Some(v) => {
                            out.push(v);
                            true
                        }
                        None => false,
                    }
                }
                Value::Array(items) => {
                    if depth == shape.len() {
                        if !out.is_empty() {
                            return false;
                        }
                        shape.push(items.len());
                    } else if depth > shape.len() || shape[depth] != items.len() {
                        return false;
                    }
                    items.iter().all(|item| walk(item, depth + 1, shape, out))
                }
                _ => false,
            }
        }

        let mut shape = Vec::new();
        let mut values = Vec::new();
        if walk(value, 0, &mut shape, &mut values) {
            NdArray::new(shape, values).ok()
        } else {
            None
        }
    }
}

impl From<ArrayD<f64>> for NdArray {
    fn from(array: ArrayD<f64>) -> Self {
        if array.is_standard_layout() {
            Self(array)
        } else {
            Self(array.as_standard_layout().into_owned())
        }
    }
}

/// Product of the dimensions, or `None` if it overflows `usize`.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// Intermediate value produced by `input_fn` and `predict_fn`.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
    Array(NdArray),
}

impl From<Payload> for Data {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => Data::Text(text),
            Payload::Bytes(bytes) => Data::Bytes(bytes),
        }
    }
}

/// Serialized result of `output_fn` or `transform_fn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Body whose content type is the resolved accept
    Body(Vec<u8>),
    /// Body with an explicit content type overriding the resolved accept
    Typed { body: Vec<u8>, content_type: String },
}

impl Output {
    pub fn typed(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self::Typed {
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    /// Body and the content type to report, given the resolved accept.
    pub fn into_parts(self, accept: &str) -> (Vec<u8>, String) {
        match self {
            Self::Body(body) => (body, accept.to_string()),
            Self::Typed { body, content_type } => (body, content_type),
        }
    }
}

impl From<Vec<u8>> for Output {
    fn from(body: Vec<u8>) -> Self {
        Self::Body(body)
    }
}

impl From<String> for Output {
    fn from(body: String) -> Self {
        Self::Body(body.into_bytes())
    }
}

impl From<&str> for Output {
    fn from(body: &str) -> Self {
        Self::Body(body.as_bytes().to_vec())
    }
}

impl<B, C> From<(B, C)> for Output
where
    B: Into<Vec<u8>>,
    C: Into<String>,
{
    fn from((body, content_type): (B, C)) -> Self {
        Self::typed(body, content_type)
    }
}

/// One item of an inference request batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestItem {
    pub body: Vec<u8>,
}

impl RequestItem {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into() }
    }
}
