//! `Upload-Metadata` header parsing.
//!
//! The header is a comma-separated list of `key base64value` pairs, where the
//! value may be omitted.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Empty metadata key")]
    EmptyKey,

    #[error("Duplicate metadata key: {0}")]
    DuplicateKey(String),

    #[error("Invalid base64 value for key {0}")]
    InvalidValue(String),

    #[error("Unexpected data after value for key {0}")]
    TrailingData(String),
}

/// Decode every pair. Values are raw bytes since metadata may be binary.
pub fn parse(header: &str) -> Result<HashMap<String, Option<Vec<u8>>>, MetadataError> {
    let mut pairs = HashMap::new();

    for pair in header.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let mut parts = pair.split_whitespace();
        let key = parts.next().ok_or(MetadataError::EmptyKey)?.to_string();
        let value = match parts.next() {
            Some(encoded) => Some(
                STANDARD
                    .decode(encoded)
                    .map_err(|_| MetadataError::InvalidValue(key.clone()))?,
            ),
            None => None,
        };
        if parts.next().is_some() {
            return Err(MetadataError::TrailingData(key));
        }

        if pairs.contains_key(&key) {
            return Err(MetadataError::DuplicateKey(key));
        }
        pairs.insert(key, value);
    }

    Ok(pairs)
}

/// The client-supplied file name, from `filename` or else `name`.
pub fn display_name(header: &str) -> Option<String> {
    let mut pairs = match parse(header) {
        Ok(pairs) => pairs,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed Upload-Metadata");
            return None;
        }
    };

    ["filename", "name"].into_iter().find_map(|key| {
        pairs
            .remove(key)
            .flatten()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|name| !name.is_empty())
    })
}
