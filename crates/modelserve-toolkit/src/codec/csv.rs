// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Numeric CSV rows.

use crate::error::{ToolkitError, status};
use crate::types::NdArray;

/// Decode numeric CSV into a `rows x columns` array.
///
/// Blank lines are skipped and cells are trimmed. Quoted cells are accepted.
/// Every row must have the same number of cells.
pub fn decode(text: &str) -> Result<NdArray, ToolkitError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut columns = None;
    let mut rows = 0;
    let mut values = Vec::new();

    for record in reader.records() {
        let record = record
            .map_err(|e| ToolkitError::bad_request(format!("invalid csv: {}", e)))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        for cell in record.iter() {
            let value: f64 = cell.parse().map_err(|_| {
                ToolkitError::bad_request(format!(
                    "invalid csv: non-numeric value '{}' on line {}",
                    cell, line
                ))
            })?;
            values.push(value);
        }

        match columns {
            None => columns = Some(record.len()),
            Some(expected) if expected != record.len() => {
                return Err(ToolkitError::bad_request(format!(
                    "invalid csv: line {} has {} values, expected {}",
                    line,
                    record.len(),
                    expected
                )));
            }
            Some(_) => {}
        }
        rows += 1;
    }

    NdArray::new(vec![rows, columns.unwrap_or(0)], values)
}

/// Encode an array of at most two dimensions.
///
/// Vectors are written one value per line.
pub fn encode(array: &NdArray) -> Result<Vec<u8>, ToolkitError> {
    let rows: Vec<Vec<String>> = match array.ndim() {
        0 | 1 => array.values().iter().map(|v| vec![v.to_string()]).collect(),
        2 => array
            .as_array()
            .outer_iter()
            .filter(|row| !row.is_empty())
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect(),
        dims => {
            return Err(ToolkitError::new(
                status::UNSUPPORTED_MEDIA_TYPE,
                format!("cannot encode a {}-dimensional array as csv", dims),
            ));
        }
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in &rows {
        writer.write_record(row).map_err(write_failed)?;
    }
    writer
        .into_inner()
        .map_err(|e| write_failed(e.into_error()))
}

fn write_failed(err: impl std::fmt::Display) -> ToolkitError {
    ToolkitError::new(
        status::INTERNAL_SERVER_ERROR,
        format!("csv encoding failed: {}", err),
    )
}
