//! Pull a JSON object out of free-form model output.
//!
//! Models are asked for strict JSON but routinely wrap it in prose or code
//! fences. We take the first balanced `{...}` substring, tracking string
//! literals and escapes so braces inside strings do not count.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON object found in model output")]
    NoObject,
    #[error("JSON object is not valid for the expected shape: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Returns the first balanced `{...}` slice of `text`, if any.
pub fn first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find('{') {
        let start = search_from + rel;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..=i]);
                    }
                }
                _ => {}
            }
        }

        // Unbalanced from this brace; try the next opening brace.
        search_from = start + 1;
    }
    None
}

/// Extract the first object and deserialize it into `T`.
pub fn parse_first_object<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let raw = first_json_object(text).ok_or(ExtractError::NoObject)?;
    Ok(serde_json::from_str(raw)?)
}
