//! Error types for cargar
//!
//! One taxonomy covers the whole crate: store format parsing, tensor
//! construction, and the loading pipeline itself. Fail-fast strategies
//! surface the first error and halt; permissive strategies report skipped
//! names through [`crate::loader::LoadReport`] instead of erroring.

use thiserror::Error;

use crate::tensor::Dtype;

/// Error type for all cargar operations
#[derive(Debug, Error)]
pub enum CargarError {
    /// A parameter name required by the model is absent from the store
    #[error("Missing parameter '{name}' in tensor store")]
    MissingParameter {
        /// Name of the absent parameter
        name: String,
    },

    /// Store entry shape does not match the slot's declared shape
    #[error("Shape mismatch for '{name}': slot expects {expected:?}, store has {actual:?}")]
    ShapeMismatch {
        /// Parameter name
        name: String,
        /// Shape declared by the model slot
        expected: Vec<usize>,
        /// Shape found in the store
        actual: Vec<usize>,
    },

    /// Store entry dtype does not match the slot's declared dtype
    #[error("Dtype mismatch for '{name}': slot expects {expected}, store has {actual}")]
    DtypeMismatch {
        /// Parameter name
        name: String,
        /// Dtype declared by the model slot
        expected: Dtype,
        /// Dtype found in the store
        actual: Dtype,
    },

    /// Underlying storage I/O failure
    #[error("I/O failure for '{name}': {reason}")]
    IoFailure {
        /// Parameter name or file path the read was for
        name: String,
        /// Underlying error description
        reason: String,
    },

    /// Malformed checkpoint bytes (bad magic, truncation, entry parse)
    #[error("Format error: {reason}")]
    FormatError {
        /// What failed to parse
        reason: String,
    },

    /// Invalid tensor shape (empty, or contains a zero dimension)
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// Why the shape was rejected
        reason: String,
    },

    /// Data length does not match the product of the shape dimensions
    #[error("Data/shape mismatch: shape needs {expected} elements, data has {actual}")]
    DataShapeMismatch {
        /// Element count implied by the shape
        expected: usize,
        /// Element count actually provided
        actual: usize,
    },

    /// Operation not valid for the slot's current state
    #[error("Invalid slot state for '{name}': {reason}")]
    InvalidSlotState {
        /// Parameter name
        name: String,
        /// What the operation required
        reason: String,
    },
}

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CargarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameter_names_the_parameter() {
        let err = CargarError::MissingParameter {
            name: "layers.0.weight".to_string(),
        };
        assert!(err.to_string().contains("layers.0.weight"));
        assert!(err.to_string().contains("Missing parameter"));
    }

    #[test]
    fn shape_mismatch_reports_both_shapes() {
        let err = CargarError::ShapeMismatch {
            name: "fc.weight".to_string(),
            expected: vec![4, 8],
            actual: vec![8, 4],
        };
        let msg = err.to_string();
        assert!(msg.contains("[4, 8]"));
        assert!(msg.contains("[8, 4]"));
    }

    #[test]
    fn dtype_mismatch_reports_both_dtypes() {
        let err = CargarError::DtypeMismatch {
            name: "fc.bias".to_string(),
            expected: Dtype::F32,
            actual: Dtype::F16,
        };
        let msg = err.to_string();
        assert!(msg.contains("F32"));
        assert!(msg.contains("F16"));
    }

    #[test]
    fn io_failure_carries_cause() {
        let err = CargarError::IoFailure {
            name: "model.ckpt".to_string(),
            reason: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn format_error_display() {
        let err = CargarError::FormatError {
            reason: "bad magic".to_string(),
        };
        assert!(err.to_string().contains("bad magic"));
    }
}
