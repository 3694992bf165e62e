//! Content fingerprints used for idempotent reprocessing.
//!
//! The fingerprint is the hex SHA-256 of a canonical JSON rendering: object
//! keys sorted, no insignificant whitespace. The rendering does not depend on
//! serde_json's map ordering features, so fingerprints are stable across
//! builds and restarts.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::segmenter::Discussion;
use crate::transcript::Message;

pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Fingerprint of a whole raw transcript.
pub fn session_hash(messages: &[Message]) -> Result<String, serde_json::Error> {
    fingerprint(messages)
}

/// Fingerprint of one discussion's message array.
pub fn discussion_hash(discussion: &Discussion) -> Result<String, serde_json::Error> {
    fingerprint(&discussion.messages)
}
