// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Decoders and encoders for the content types the default handler speaks.
//!
//! | Content type | Decodes to | Encodes from |
//! |--------------|------------|--------------|
//! | `application/json` | [`Data::Json`] | JSON values and arrays |
//! | `text/csv` | [`Data::Array`] (2-D) | arrays of at most 2 dimensions |
//! | `application/x-npy` | [`Data::Array`] | arrays |
//!
//! Anything else is rejected with status 415.

pub mod csv;
pub mod npy;

use serde_json::Value;

use crate::content_types;
use crate::error::{ToolkitError, status};
use crate::types::{Data, NdArray, Payload};

/// Decode a request body according to its content type.
pub fn decode(payload: &Payload, content_type: &str) -> Result<Data, ToolkitError> {
    let essence = content_types::essence(content_type);
    match essence.as_str() {
        content_types::JSON => {
            let value: Value = serde_json::from_slice(payload.as_bytes())
                .map_err(|e| ToolkitError::bad_request(format!("invalid json: {}", e)))?;
            Ok(Data::Json(value))
        }
        content_types::CSV => {
            let text = std::str::from_utf8(payload.as_bytes())
                .map_err(|e| ToolkitError::bad_request(format!("invalid csv: {}", e)))?;
            csv::decode(text).map(Data::Array)
        }
        content_types::NPY => npy::decode(payload.as_bytes()).map(Data::Array),
        _ => Err(ToolkitError::unsupported_format(content_type)),
    }
}

/// Encode a prediction for the given accept. `*/*` encodes as JSON.
pub fn encode(data: &Data, accept: &str) -> Result<Vec<u8>, ToolkitError> {
    let essence = content_types::essence(accept);
    match essence.as_str() {
        content_types::JSON | content_types::ANY => {
            let value = match data {
                Data::Json(value) => value.clone(),
                Data::Array(array) => array.to_json(),
                Data::Text(text) => Value::String(text.clone()),
                Data::Bytes(_) => return Err(not_encodable("binary data", accept)),
            };
            serde_json::to_vec(&value).map_err(|e| {
                ToolkitError::new(status::INTERNAL_SERVER_ERROR, format!("json encoding failed: {}", e))
            })
        }
        content_types::CSV => csv::encode(&as_array(data, accept)?),
        content_types::NPY => Ok(npy::encode(&as_array(data, accept)?)),
        _ => Err(ToolkitError::unsupported_format(accept)),
    }
}

fn as_array(data: &Data, accept: &str) -> Result<NdArray, ToolkitError> {
    match data {
        Data::Array(array) => Ok(array.clone()),
        Data::Json(value) => match value {
            Value::Number(n) => n
                .as_f64()
                .map(|v| NdArray::vector(vec![v]))
                .ok_or_else(|| not_encodable("this number", accept)),
            other => NdArray::from_json(other).ok_or_else(|| not_encodable("non-numeric json", accept)),
        },
        Data::Text(_) => Err(not_encodable("text", accept)),
        Data::Bytes(_) => Err(not_encodable("binary data", accept)),
    }
}

fn not_encodable(what: &str, accept: &str) -> ToolkitError {
    ToolkitError::new(
        status::UNSUPPORTED_MEDIA_TYPE,
        format!("cannot encode {} as {}", what, accept),
    )
}
