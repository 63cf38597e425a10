//! Fixed-width binary vector codec.
//!
//! A vector persists as its raw IEEE-754 f32 bytes, `4 * dim` per blob.
//! Decode copies into a fresh allocation, so blob alignment from the row
//! store never matters.

use crate::error::{Error, Result};

/// Serialize a vector into the durable blob form.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(vector).to_vec()
}

/// Deserialize a blob back into a vector, verifying the width matches
/// the collection dimension.
pub fn decode(blob: &[u8], dim: usize) -> Result<Vec<f32>> {
    if blob.len() != dim * size_of::<f32>() {
        return Err(Error::Validation(format!(
            "vector blob is {} bytes, expected {} for dimension {dim}",
            blob.len(),
            dim * size_of::<f32>()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(blob))
}
