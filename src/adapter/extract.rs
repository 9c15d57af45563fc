//! Embedded JSON extraction
//!
//! Supplier pages ship their state as a JSON object assigned in a script
//! block, e.g. `window.__ORDER_HISTORY__ = {...};`. Rather than building a
//! DOM we find the marker and walk forward to the matching closing brace.

use crate::adapter::ParseError;
use serde::de::DeserializeOwned;

/// Returns the JSON object text that immediately follows `marker`
///
/// Only whitespace, `=` and `:` may sit between the marker and the opening
/// brace. Braces inside string literals are ignored.
pub fn extract_object<'a>(page: &'a str, marker: &str) -> Result<&'a str, ParseError> {
    let marker_at = page.find(marker).ok_or_else(|| ParseError::MarkerNotFound {
        marker: marker.to_string(),
    })?;

    let after_marker = marker_at + marker.len();
    let offset = page[after_marker..]
        .find(|c: char| !(c.is_whitespace() || c == '=' || c == ':'))
        .ok_or_else(|| ParseError::MissingObject {
            marker: marker.to_string(),
        })?;
    let start = after_marker + offset;

    if !page[start..].starts_with('{') {
        return Err(ParseError::MissingObject {
            marker: marker.to_string(),
        });
    }

    let end = matching_brace(&page.as_bytes()[start..]).ok_or_else(|| ParseError::Unbalanced {
        marker: marker.to_string(),
    })?;

    Ok(&page[start..=start + end])
}

/// Deserializes the JSON object that follows `marker`
pub fn parse_embedded<T: DeserializeOwned>(page: &str, marker: &str) -> Result<T, ParseError> {
    let object = extract_object(page, marker)?;
    serde_json::from_str(object).map_err(|e| ParseError::Json {
        marker: marker.to_string(),
        message: e.to_string(),
    })
}

/// Index of the brace closing the object that starts at `bytes[0]`
fn matching_brace(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
