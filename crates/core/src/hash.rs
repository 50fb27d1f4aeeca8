// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Content fingerprints.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fingerprint of a record's synced fields.
///
/// SHA-256 hex over the canonical JSON form, where object keys are sorted at
/// every level so field order in the source never changes the hash.
pub fn sync_hash(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// First `len` hex chars of SHA-256(input).
pub fn short_digest(input: &[u8], len: usize) -> String {
    let mut encoded = hex::encode(Sha256::digest(input));
    encoded.truncate(len);
    encoded
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
