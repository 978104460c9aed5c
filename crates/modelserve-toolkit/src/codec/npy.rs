// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NumPy `.npy` reader and writer.
//!
//! Reads format versions 1.0 and 2.0 with little-endian `f4`, `f8`, `i4`,
//! `i8` or `u1` data in C order. Writes version 1.0 `<f8`.

use crate::error::ToolkitError;
use crate::types::{NdArray, element_count};

const MAGIC: &[u8] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F4,
    F8,
    I4,
    I8,
    U1,
}

impl Dtype {
    fn parse(descr: &str) -> Option<Self> {
        match descr {
            "<f4" => Some(Self::F4),
            "<f8" => Some(Self::F8),
            "<i4" => Some(Self::I4),
            "<i8" => Some(Self::I8),
            "|u1" | "<u1" => Some(Self::U1),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::U1 => 1,
            Self::F4 | Self::I4 => 4,
            Self::F8 | Self::I8 => 8,
        }
    }

    fn read(self, chunk: &[u8]) -> f64 {
        match self {
            Self::F4 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            Self::I4 => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            Self::F8 => f64::from_le_bytes(eight(chunk)),
            Self::I8 => i64::from_le_bytes(eight(chunk)) as f64,
            Self::U1 => chunk[0] as f64,
        }
    }
}

fn eight(chunk: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&chunk[..8]);
    buf
}

fn invalid(reason: impl Into<String>) -> ToolkitError {
    ToolkitError::bad_request(format!("invalid npy payload: {}", reason.into()))
}

/// Decode an `.npy` payload.
pub fn decode(bytes: &[u8]) -> Result<NdArray, ToolkitError> {
    if bytes.len() < 10 || !bytes.starts_with(MAGIC) {
        return Err(invalid("missing magic string"));
    }

    let major = bytes[6];
    let (header_len, header_start): (usize, usize) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(invalid("truncated header length"));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        other => return Err(invalid(format!("unsupported format version {}", other))),
    };

    let data_start = header_start
        .checked_add(header_len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| invalid("truncated header"))?;
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| invalid("header is not valid text"))?;

    let descr = header_value(header, "descr")
        .map(|v| v.trim_matches(|c| c == '\'' || c == '"'))
        .ok_or_else(|| invalid("header has no descr"))?;
    let dtype = Dtype::parse(descr).ok_or_else(|| invalid(format!("unsupported dtype {}", descr)))?;

    match header_value(header, "fortran_order") {
        Some("False") => {}
        Some("True") => return Err(invalid("fortran order arrays are not supported")),
        _ => return Err(invalid("header has no fortran_order")),
    }

    let shape = header_value(header, "shape")
        .ok_or_else(|| invalid("header has no shape"))
        .and_then(parse_shape)?;

    let expected = element_count(&shape)
        .and_then(|count| count.checked_mul(dtype.size()))
        .ok_or_else(|| invalid("shape too large"))?;
    let data = &bytes[data_start..];
    if data.len() != expected {
        return Err(invalid(format!(
            "expected {} bytes of data, got {}",
            expected,
            data.len()
        )));
    }

    let values = data.chunks_exact(dtype.size()).map(|c| dtype.read(c)).collect();
    NdArray::new(shape, values)
}

/// Encode an array as version 1.0 `<f8`.
pub fn encode(array: &NdArray) -> Vec<u8> {
    let shape = match array.shape() {
        [] => "()".to_string(),
        [n] => format!("({},)", n),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}",
        shape
    );

    // magic + version + u16 length + header + newline, padded to the alignment
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(unpadded + padding + array.values().len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in array.values() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Raw text of `key`'s value in the header dict literal.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let needle_single = format!("'{}'", key);
    let needle_double = format!("\"{}\"", key);
    let key_pos = header
        .find(&needle_single)
        .map(|p| p + needle_single.len())
        .or_else(|| header.find(&needle_double).map(|p| p + needle_double.len()))?;
    let rest = header[key_pos..].trim_start().strip_prefix(':')?.trim_start();

    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find([',', '}'])?
    };
    Some(rest[..end].trim())
}

fn parse_shape(raw: &str) -> Result<Vec<usize>, ToolkitError> {
    let inner = raw
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| invalid(format!("malformed shape {}", raw)))?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.trim_end_matches('L')
                .parse()
                .map_err(|_| invalid(format!("malformed shape {}", raw)))
        })
        .collect()
}
