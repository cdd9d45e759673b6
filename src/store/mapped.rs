//! Memory-mapped checkpoint access
//!
//! Opening is O(1) with respect to file size: only the header, metadata,
//! and index are parsed. Tensor bytes stay on disk until a slot's read
//! touches them, at which point the operating system pages them in. How
//! much of the file ends up resident is page-cache-dependent, which is why
//! the MappedAssign strategy's measured host footprint is workload-varying
//! rather than a fixed bound.

use std::path::{Path, PathBuf};

use crate::error::{CargarError, Result};
use crate::tensor::{Tensor, TensorDescriptor};

use super::{CheckpointLayout, CheckpointMetadata, TensorEntry};

/// Checkpoint opened via random-access mapping rather than a full read
#[derive(Debug)]
pub struct MappedCheckpoint {
    mmap: memmap2::Mmap,
    path: PathBuf,
    layout: CheckpointLayout,
}

impl MappedCheckpoint {
    /// Map a checkpoint file and parse its index
    ///
    /// # Errors
    ///
    /// Returns `IoFailure` if the file cannot be opened or mapped and
    /// `FormatError` if the header or index does not parse.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| CargarError::IoFailure {
            name: path.display().to_string(),
            reason: format!("Failed to open checkpoint: {e}"),
        })?;

        // SAFETY: file is opened read-only and not modified while mapped
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .map(&file)
                .map_err(|e| CargarError::IoFailure {
                    name: path.display().to_string(),
                    reason: format!("Failed to mmap checkpoint: {e}"),
                })?
        };

        let layout = CheckpointLayout::parse(&mmap, mmap.len())?;
        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            layout,
        })
    }

    /// Path the mapping was opened from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checkpoint metadata
    #[must_use]
    pub fn metadata(&self) -> &CheckpointMetadata {
        &self.layout.metadata
    }

    /// Number of tensors in the store
    #[must_use]
    pub fn tensor_count(&self) -> usize {
        self.layout.entries.len()
    }

    /// Tensor names in index order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.layout.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Index entries in order
    #[must_use]
    pub fn entries(&self) -> &[TensorEntry] {
        &self.layout.entries
    }

    /// Descriptor for one named tensor
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if the name is absent.
    pub fn descriptor(&self, name: &str) -> Result<TensorDescriptor> {
        Ok(self.layout.entry(name)?.descriptor())
    }

    /// Raw tensor bytes as a zero-copy slice into the mapped file
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if the name is absent.
    pub fn tensor_bytes(&self, name: &str) -> Result<&[u8]> {
        let entry = self.layout.entry(name)?;
        let start = self.layout.data_offset + entry.offset as usize;
        Ok(&self.mmap[start..start + entry.size as usize])
    }

    /// Decode one named tensor directly from the mapped region
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if the name is absent and `FormatError`
    /// if the mapped bytes do not decode.
    pub fn read_one(&self, name: &str) -> Result<Tensor> {
        let desc = self.descriptor(name)?;
        Tensor::from_le_bytes(&desc, self.tensor_bytes(name)?)
    }
}
