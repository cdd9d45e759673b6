//! Tensor and descriptor types
//!
//! A [`Tensor`] is an N-dimensional array of values held as `f32` in
//! row-major order, tagged with the [`Dtype`] that governs its serialized
//! width. A [`TensorDescriptor`] is the shape/dtype contract a model slot
//! declares and a store entry must satisfy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CargarError, Result};

/// Serialized element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    /// 32-bit IEEE float, 4 bytes per element
    F32,
    /// 16-bit IEEE float (via `half::f16`), 2 bytes per element
    F16,
}

impl Dtype {
    /// Bytes per element for this dtype
    #[must_use]
    pub fn size_of(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F16 => 2,
        }
    }

    /// On-disk tag byte for checkpoint entries
    #[must_use]
    pub(crate) fn tag(self) -> u8 {
        match self {
            Dtype::F32 => 0,
            Dtype::F16 => 1,
        }
    }

    /// Parse an on-disk tag byte
    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Dtype::F32),
            1 => Ok(Dtype::F16),
            other => Err(CargarError::FormatError {
                reason: format!("Unknown dtype tag: {other}"),
            }),
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dtype::F32 => write!(f, "F32"),
            Dtype::F16 => write!(f, "F16"),
        }
    }
}

/// Shape/dtype contract for one named parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    /// Unique parameter name (shared between model slot and store entry)
    pub name: String,
    /// Tensor dimensions
    pub shape: Vec<usize>,
    /// Element type
    pub dtype: Dtype,
}

impl TensorDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, shape: Vec<usize>, dtype: Dtype) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
        }
    }

    /// Element count implied by the shape
    #[must_use]
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Serialized size in bytes
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.size() * self.dtype.size_of()
    }

    /// In-memory size in bytes once decoded (values are held as `f32`
    /// regardless of the serialized dtype)
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.size() * Dtype::F32.size_of()
    }

    /// Check a tensor against this contract
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` or `DtypeMismatch` naming this descriptor's
    /// parameter if the tensor does not satisfy the contract.
    pub fn check(&self, tensor: &Tensor) -> Result<()> {
        if tensor.shape() != self.shape.as_slice() {
            return Err(CargarError::ShapeMismatch {
                name: self.name.clone(),
                expected: self.shape.clone(),
                actual: tensor.shape().to_vec(),
            });
        }
        if tensor.dtype() != self.dtype {
            return Err(CargarError::DtypeMismatch {
                name: self.name.clone(),
                expected: self.dtype,
                actual: tensor.dtype(),
            });
        }
        Ok(())
    }
}

/// N-dimensional tensor with row-major `f32` values
///
/// Values are always held as `f32` in memory; `dtype` records the width the
/// tensor serializes to (an `F16` tensor round-trips through `half::f16` on
/// the way to and from a store).
///
/// # Examples
///
/// ```
/// use cargar::tensor::{Dtype, Tensor};
///
/// let t = Tensor::from_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
/// assert_eq!(t.shape(), &[2, 3]);
/// assert_eq!(t.size(), 6);
/// assert_eq!(t.dtype(), Dtype::F32);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: Dtype,
    data: Vec<f32>,
}

impl Tensor {
    /// Create an `F32` tensor from a shape and flattened data
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` if the shape is empty or contains a zero
    /// dimension, and `DataShapeMismatch` if the data length does not equal
    /// the product of the dimensions.
    pub fn from_vec(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        Self::from_vec_dtype(shape, data, Dtype::F32)
    }

    /// Create a tensor with an explicit serialized dtype
    ///
    /// # Errors
    ///
    /// Same contract as [`Tensor::from_vec`].
    pub fn from_vec_dtype(shape: Vec<usize>, data: Vec<f32>, dtype: Dtype) -> Result<Self> {
        if shape.is_empty() {
            return Err(CargarError::InvalidShape {
                reason: "Shape must have at least one dimension".to_string(),
            });
        }
        if shape.contains(&0) {
            return Err(CargarError::InvalidShape {
                reason: format!("Shape contains zero dimension: {shape:?}"),
            });
        }
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(CargarError::DataShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, dtype, data })
    }

    /// Zero-filled tensor matching a descriptor
    #[must_use]
    pub fn zeros(desc: &TensorDescriptor) -> Self {
        Self {
            shape: desc.shape.clone(),
            dtype: desc.dtype,
            data: vec![0.0; desc.size()],
        }
    }

    /// Tensor shape
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Serialized element type
    #[must_use]
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Number of dimensions
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total element count
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Serialized size in bytes
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.size() * self.dtype.size_of()
    }

    /// In-memory size in bytes (the backing `Vec<f32>`), which is what
    /// memory accounting measures; differs from [`Tensor::size_in_bytes`]
    /// for narrower serialized dtypes
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.size() * Dtype::F32.size_of()
    }

    /// Flattened values in row-major order
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Overwrite this tensor's values from another of identical geometry
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch`/`DtypeMismatch` (attributed to `name`) if the
    /// source tensor differs in shape or dtype.
    pub fn copy_from(&mut self, name: &str, src: &Tensor) -> Result<()> {
        if src.shape != self.shape {
            return Err(CargarError::ShapeMismatch {
                name: name.to_string(),
                expected: self.shape.clone(),
                actual: src.shape.clone(),
            });
        }
        if src.dtype != self.dtype {
            return Err(CargarError::DtypeMismatch {
                name: name.to_string(),
                expected: self.dtype,
                actual: src.dtype,
            });
        }
        self.data.copy_from_slice(&src.data);
        Ok(())
    }

    /// Serialize values to little-endian bytes at this tensor's dtype width
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self.dtype {
            Dtype::F32 => self
                .data
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
            Dtype::F16 => self
                .data
                .iter()
                .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
                .collect(),
        }
    }

    /// Decode a tensor from little-endian bytes matching a descriptor
    ///
    /// # Errors
    ///
    /// Returns `FormatError` if the byte length does not match the
    /// descriptor's serialized size.
    pub fn from_le_bytes(desc: &TensorDescriptor, bytes: &[u8]) -> Result<Self> {
        let expected = desc.size_in_bytes();
        if bytes.len() != expected {
            return Err(CargarError::FormatError {
                reason: format!(
                    "Tensor '{}' data is {} bytes, descriptor needs {}",
                    desc.name,
                    bytes.len(),
                    expected
                ),
            });
        }
        let data = match desc.dtype {
            Dtype::F32 => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().expect("chunk is 4 bytes")))
                .collect(),
            Dtype::F16 => bytes
                .chunks_exact(2)
                .map(|c| {
                    half::f16::from_le_bytes(c.try_into().expect("chunk is 2 bytes")).to_f32()
                })
                .collect(),
        };
        Ok(Self {
            shape: desc.shape.clone(),
            dtype: desc.dtype,
            data,
        })
    }

    /// Descriptor for this tensor under the given name
    #[must_use]
    pub fn descriptor(&self, name: impl Into<String>) -> TensorDescriptor {
        TensorDescriptor {
            name: name.into(),
            shape: self.shape.clone(),
            dtype: self.dtype,
        }
    }
}
