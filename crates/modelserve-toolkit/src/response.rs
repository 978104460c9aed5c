// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-item results handed back to the serving runtime.

use serde::Serialize;

use crate::error::InferenceError;

/// Failure payload for one item, as reported to the serving runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Position of the failed item in the request batch
    pub index: usize,
    pub status: u16,
    /// Reason phrase, single line
    pub phrase: String,
    /// Error message followed by the captured trace
    pub body: String,
}

impl ErrorResponse {
    pub fn build(index: usize, err: &InferenceError) -> Self {
        let phrase = err
            .phrase()
            .chars()
            .filter(|c| *c != '\r' && *c != '\n')
            .collect();
        Self {
            index,
            status: err.status_code(),
            phrase,
            body: format!("{}\n{}", err.message(), err.trace()),
        }
    }
}

/// Result for one request item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResponse {
    Success { body: Vec<u8>, content_type: String },
    Failure(ErrorResponse),
}

impl ItemResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn body(&self) -> &[u8] {
        match self {
            Self::Success { body, .. } => body,
            Self::Failure(err) => err.body.as_bytes(),
        }
    }

    /// Content type of a successful item.
    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::Success { content_type, .. } => Some(content_type),
            Self::Failure(_) => None,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Success { .. } => 200,
            Self::Failure(err) => err.status,
        }
    }

    pub fn error(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(err) => Some(err),
        }
    }
}

/// Ordered results, one per request item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub items: Vec<ItemResponse>,
}

impl Response {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether any item failed.
    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|item| !item.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ErrorResponse> {
        self.items.iter().filter_map(ItemResponse::error)
    }
}

impl FromIterator<ItemResponse> for Response {
    fn from_iter<I: IntoIterator<Item = ItemResponse>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HandlerError, ToolkitError};

    #[test]
    fn test_error_response_strips_newlines_from_phrase() {
        let err: InferenceError =
            HandlerError::from(ToolkitError::new(400, "bad").with_phrase("Bad\r\nRequest")).into();
        let response = ErrorResponse::build(3, &err);

        assert_eq!(response.index, 3);
        assert_eq!(response.status, 400);
        assert_eq!(response.phrase, "BadRequest");
        assert!(response.body.starts_with("bad\nError: bad"));
    }

    #[test]
    fn test_error_response_serializes() {
        let err: InferenceError = HandlerError::msg("boom").into();
        let value = serde_json::to_value(ErrorResponse::build(0, &err)).unwrap();
        assert_eq!(value["status"], 500);
        assert_eq!(value["phrase"], "Internal Server Error");
    }

    #[test]
    fn test_response_accessors() {
        let err: InferenceError = HandlerError::msg("boom").into();
        let response: Response = vec![
            ItemResponse::Success {
                body: b"ok".to_vec(),
                content_type: "text/plain".to_string(),
            },
            ItemResponse::Failure(ErrorResponse::build(1, &err)),
        ]
        .into_iter()
        .collect();

        assert_eq!(response.len(), 2);
        assert!(response.has_failures());
        assert_eq!(response.items[0].content_type(), Some("text/plain"));
        assert_eq!(response.items[0].status(), 200);
        assert_eq!(response.items[1].status(), 500);
        assert_eq!(response.failures().count(), 1);
    }
}
