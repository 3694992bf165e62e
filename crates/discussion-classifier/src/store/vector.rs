//! Embedding BLOB encoding and cosine similarity.

use super::StoreResult;

pub fn encode_embedding(embedding: &[f32]) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(embedding)?)
}

pub fn decode_embedding(bytes: &[u8]) -> StoreResult<Vec<f32>> {
    Ok(bincode::deserialize(bytes)?)
}

/// Decodes an optional BLOB column inside a row mapper.
pub(crate) fn decode_column(bytes: Option<Vec<u8>>, column: usize) -> rusqlite::Result<Option<Vec<f32>>> {
    bytes
        .map(|b| {
            bincode::deserialize::<Vec<f32>>(&b).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Blob, e)
            })
        })
        .transpose()
}

/// Cosine similarity accumulated in f64. Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

/// Keeps candidates at or above `threshold`, most similar first, capped at `limit`.
/// The sort is stable, so equal scores keep storage order.
pub(crate) fn rank<T>(mut scored: Vec<(T, f64)>, threshold: f64, limit: usize) -> Vec<(T, f64)> {
    scored.retain(|(_, sim)| *sim >= threshold);
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}
