// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Content-type constants and helpers for request negotiation.

/// JSON documents.
pub const JSON: &str = "application/json";
/// Comma-separated numeric rows.
pub const CSV: &str = "text/csv";
/// NumPy `.npy` array serialization.
pub const NPY: &str = "application/x-npy";
/// Opaque binary payloads.
pub const OCTET_STREAM: &str = "application/octet-stream";
/// Wildcard accept value.
pub const ANY: &str = "*/*";

/// Content types whose bodies are decoded as UTF-8 text before reaching handlers.
pub const UTF8_TYPES: [&str; 2] = [JSON, CSV];

/// Media type without parameters, lower-cased.
///
/// `"Application/JSON; charset=utf-8"` becomes `"application/json"`.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Whether bodies of this content type are handed to handlers as text.
pub fn is_utf8(content_type: &str) -> bool {
    let essence = essence(content_type);
    UTF8_TYPES.iter().any(|t| *t == essence)
}

/// Whether `content_type` names the same media type as `expected`.
pub fn matches(content_type: &str, expected: &str) -> bool {
    essence(content_type) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_essence_strips_parameters() {
        assert_eq!(essence("application/json; charset=utf-8"), JSON);
        assert_eq!(essence("  Text/CSV "), CSV);
        assert_eq!(essence(""), "");
    }

    #[test]
    fn test_utf8_types() {
        assert!(is_utf8(JSON));
        assert!(is_utf8("text/csv;header=present"));
        assert!(!is_utf8(NPY));
        assert!(!is_utf8(OCTET_STREAM));
        assert!(!is_utf8("text/plain"));
    }

    #[test]
    fn test_matches() {
        assert!(matches("APPLICATION/X-NPY", NPY));
        assert!(!matches(JSON, CSV));
    }
}
