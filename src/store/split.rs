//! Per-tensor store: one checkpoint file per named tensor
//!
//! This layout is the precondition for the PerTensorFile strategy: reading
//! one parameter touches exactly one file, so the host staging footprint is
//! bounded by the largest single tensor regardless of total store size.
//! Each file is a single-entry checkpoint, so the combined-file codec is
//! reused unchanged.

use std::path::{Path, PathBuf};

use crate::error::{CargarError, Result};
use crate::tensor::{Tensor, TensorDescriptor};

use super::{write_checkpoint, Checkpoint};

/// File extension used for per-tensor files
pub const TENSOR_EXT: &str = "tensor";

/// Split a combined checkpoint into one file per tensor under `dir`
///
/// Creates `dir` if needed. Each tensor lands in `<name>.tensor` (path
/// separators in names are replaced with `_`).
///
/// # Errors
///
/// Returns `IoFailure` if the directory or a file cannot be written and
/// propagates decode errors from the source checkpoint.
pub fn split_checkpoint(checkpoint: &Checkpoint, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| CargarError::IoFailure {
        name: dir.display().to_string(),
        reason: format!("Failed to create tensor directory: {e}"),
    })?;
    let meta = checkpoint.metadata().clone();
    for entry in checkpoint.entries() {
        let tensor = checkpoint.read_one(&entry.name)?;
        let path = tensor_file_path(dir, &entry.name);
        write_checkpoint(&path, &meta, &[(entry.name.clone(), tensor)])?;
    }
    Ok(())
}

fn tensor_file_path(dir: &Path, name: &str) -> PathBuf {
    let stem: String = name
        .chars()
        .map(|c| if std::path::is_separator(c) { '_' } else { c })
        .collect();
    dir.join(format!("{stem}.{TENSOR_EXT}"))
}

/// Directory of one checkpoint file per tensor
#[derive(Debug)]
pub struct TensorDir {
    dir: PathBuf,
}

impl TensorDir {
    /// Open a per-tensor directory
    ///
    /// # Errors
    ///
    /// Returns `IoFailure` if `dir` does not exist or is not a directory.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(CargarError::IoFailure {
                name: dir.display().to_string(),
                reason: "Not a directory (PerTensorFile needs a pre-split store)".to_string(),
            });
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Directory path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Names of the tensors present, sorted
    ///
    /// # Errors
    ///
    /// Returns `IoFailure` if the directory cannot be listed, and propagates
    /// parse errors from unreadable tensor files.
    pub fn names(&self) -> Result<Vec<String>> {
        let read_dir = std::fs::read_dir(&self.dir).map_err(|e| CargarError::IoFailure {
            name: self.dir.display().to_string(),
            reason: format!("Failed to list tensor directory: {e}"),
        })?;
        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| CargarError::IoFailure {
                name: self.dir.display().to_string(),
                reason: format!("Failed to list tensor directory: {e}"),
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TENSOR_EXT) {
                // The file's own index carries the authoritative name.
                let ckpt = Checkpoint::open(&path)?;
                names.extend(ckpt.names().into_iter().map(String::from));
            }
        }
        names.sort();
        Ok(names)
    }

    /// Size in bytes of one tensor's file (the per-name staging cost)
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if no file exists for `name`.
    pub fn file_size(&self, name: &str) -> Result<u64> {
        let path = tensor_file_path(&self.dir, name);
        let meta = std::fs::metadata(&path).map_err(|_| CargarError::MissingParameter {
            name: name.to_string(),
        })?;
        Ok(meta.len())
    }

    /// Descriptor for one named tensor
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if no file exists for `name`.
    pub fn descriptor(&self, name: &str) -> Result<TensorDescriptor> {
        self.open_one(name)?.descriptor(name)
    }

    /// Read exactly one tensor's file and decode it
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if no file exists for `name` and
    /// `FormatError` if the file does not parse or holds a different name.
    pub fn read_one(&self, name: &str) -> Result<Tensor> {
        self.open_one(name)?.read_one(name)
    }

    fn open_one(&self, name: &str) -> Result<Checkpoint> {
        let path = tensor_file_path(&self.dir, name);
        if !path.is_file() {
            return Err(CargarError::MissingParameter {
                name: name.to_string(),
            });
        }
        Checkpoint::open(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{write_checkpoint, CheckpointMetadata};
    use tempfile::{NamedTempFile, TempDir};

    fn split_sample() -> (TempDir, TensorDir) {
        let temp = NamedTempFile::new().expect("temp file");
        let tensors = vec![
            (
                "fc.weight".to_string(),
                Tensor::from_vec(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            ),
            (
                "fc.bias".to_string(),
                Tensor::from_vec(vec![2], vec![5.0, 6.0]).unwrap(),
            ),
        ];
        write_checkpoint(temp.path(), &CheckpointMetadata::default(), &tensors).unwrap();
        let ckpt = Checkpoint::open(temp.path()).unwrap();

        let dir = TempDir::new().expect("temp dir");
        split_checkpoint(&ckpt, dir.path()).unwrap();
        let tensor_dir = TensorDir::open(dir.path()).unwrap();
        (dir, tensor_dir)
    }

    #[test]
    fn split_produces_one_file_per_tensor() {
        let (dir, tensor_dir) = split_sample();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 2);
        assert_eq!(tensor_dir.names().unwrap(), vec!["fc.bias", "fc.weight"]);
    }

    #[test]
    fn read_one_matches_source_values() {
        let (_dir, tensor_dir) = split_sample();
        let w = tensor_dir.read_one("fc.weight").unwrap();
        assert_eq!(w.shape(), &[2, 2]);
        assert_eq!(w.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn missing_tensor_file_reports_parameter() {
        let (_dir, tensor_dir) = split_sample();
        let err = tensor_dir.read_one("fc.gamma").unwrap_err();
        assert!(matches!(err, CargarError::MissingParameter { name } if name == "fc.gamma"));
    }

    #[test]
    fn open_rejects_non_directory() {
        let temp = NamedTempFile::new().expect("temp file");
        let err = TensorDir::open(temp.path()).unwrap_err();
        assert!(matches!(err, CargarError::IoFailure { .. }));
    }

    #[test]
    fn file_size_reflects_single_tensor() {
        let (_dir, tensor_dir) = split_sample();
        let w = tensor_dir.file_size("fc.weight").unwrap();
        let b = tensor_dir.file_size("fc.bias").unwrap();
        assert!(w > b, "larger tensor should produce larger file");
    }
}
