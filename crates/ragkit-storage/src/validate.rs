//! Validation invariants enforced before any write or search
//!
//! Dimensionality, id shape, component finiteness, and metadata size are
//! checked up front by both backends. Namespace validity is enforced by the
//! `Namespace` newtype at construction and needs no re-check here.

use ragkit_core::{RagkitError, Result, VectorRecord};

/// Validate a record id: non-empty, no path traversal, no control chars.
pub fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(RagkitError::Validation(
            "vector id must be a non-empty string".to_string(),
        ));
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(RagkitError::Validation(format!(
            "vector id contains path-traversal characters: {id:?}"
        )));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(RagkitError::Validation(format!(
            "vector id contains control characters: {id:?}"
        )));
    }
    Ok(())
}

/// Validate a vector: exact dimension, finite components only.
///
/// NaN and infinite components corrupt similarity ranking irrecoverably,
/// so they are rejected rather than clamped.
pub fn validate_vector(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(RagkitError::Validation(format!(
            "vector has dimension {}, expected {dimension}",
            vector.len()
        )));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(RagkitError::Validation(format!(
            "vector component at {pos} is not a finite number"
        )));
    }
    Ok(())
}

/// Validate a full record before upsert.
pub fn validate_record(
    record: &VectorRecord,
    dimension: usize,
    max_metadata_bytes: usize,
) -> Result<()> {
    validate_id(&record.id)?;
    validate_vector(&record.embedding, dimension)?;

    let serialized = serde_json::to_vec(&record.metadata)
        .map_err(|e| RagkitError::Validation(format!("metadata is not serializable: {e}")))?;
    if serialized.len() > max_metadata_bytes {
        return Err(RagkitError::Validation(format!(
            "metadata is {} bytes, cap is {max_metadata_bytes}",
            serialized.len()
        )));
    }
    Ok(())
}
