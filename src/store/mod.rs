//! Tensor store: checkpoint format, writer, and full-read access
//!
//! A checkpoint is a single file holding every named tensor of a model.
//!
//! ## Format overview
//!
//! ```text
//! CHECKPOINT := HEADER METADATA INDEX PAD DATA
//!
//! HEADER (24 bytes):
//!   magic:        [0x43, 0x41, 0x52, 0x00]  "CAR\0"
//!   version:      u32 LE (currently 1)
//!   tensor_count: u32 LE
//!   metadata_len: u32 LE
//!   data_offset:  u64 LE (absolute, 64-byte aligned)
//!
//! METADATA := JSON (producer, optional model name)
//!
//! INDEX := tensor_count entries:
//!   name_len: u16 LE, name: UTF-8 bytes
//!   dtype:    u8
//!   ndim:     u8, dims: u64 LE each
//!   offset:   u64 LE (relative to data_offset, 64-byte aligned)
//!   size:     u64 LE (bytes)
//!
//! DATA := little-endian tensor bytes at the recorded offsets
//! ```
//!
//! Three access modes serve the loading strategies: [`Checkpoint`] reads the
//! whole file into host memory up front, [`mapped::MappedCheckpoint`] maps
//! it for random access, and [`split::TensorDir`] holds one file per tensor.

pub mod mapped;
pub mod split;

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CargarError, Result};
use crate::tensor::{Dtype, Tensor, TensorDescriptor};

/// Checkpoint magic bytes: "CAR\0"
pub const MAGIC: [u8; 4] = [0x43, 0x41, 0x52, 0x00];

/// Current checkpoint format version
pub const VERSION: u32 = 1;

/// Alignment of the data section and of each tensor's data
pub const ALIGNMENT: usize = 64;

const HEADER_SIZE: usize = 24;

/// JSON metadata block at the head of a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Tool that produced the file
    pub producer: String,
    /// Optional model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self {
            producer: format!("cargar v{}", env!("CARGO_PKG_VERSION")),
            model_name: None,
        }
    }
}

/// One index entry: where a named tensor's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorEntry {
    /// Parameter name
    pub name: String,
    /// Element type
    pub dtype: Dtype,
    /// Tensor dimensions
    pub shape: Vec<usize>,
    /// Byte offset from the data section start
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

impl TensorEntry {
    /// Descriptor view of this entry
    #[must_use]
    pub fn descriptor(&self) -> TensorDescriptor {
        TensorDescriptor::new(self.name.clone(), self.shape.clone(), self.dtype)
    }

    fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.push(self.dtype.tag());
        out.push(self.shape.len() as u8);
        for &dim in &self.shape {
            out.extend_from_slice(&(dim as u64).to_le_bytes());
        }
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out
    }

    fn from_cursor(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let name_len = read_u16(cursor)? as usize;
        let mut name_buf = vec![0u8; name_len];
        cursor
            .read_exact(&mut name_buf)
            .map_err(|e| CargarError::FormatError {
                reason: format!("Tensor entry name truncated: {e}"),
            })?;
        let name = String::from_utf8(name_buf).map_err(|e| CargarError::FormatError {
            reason: format!("Tensor entry name is not UTF-8: {e}"),
        })?;

        let dtype = Dtype::from_tag(read_u8(cursor)?)?;
        let ndim = read_u8(cursor)? as usize;
        if ndim == 0 || ndim > 8 {
            return Err(CargarError::FormatError {
                reason: format!("Tensor '{name}' has invalid ndim {ndim}"),
            });
        }
        let mut shape = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            shape.push(read_u64(cursor)? as usize);
        }
        let offset = read_u64(cursor)?;
        let size = read_u64(cursor)?;

        let expected = shape.iter().product::<usize>() * dtype.size_of();
        if size as usize != expected {
            return Err(CargarError::FormatError {
                reason: format!(
                    "Tensor '{name}' size {size} does not match shape {shape:?} ({expected} bytes)"
                ),
            });
        }

        Ok(Self {
            name,
            dtype,
            shape,
            offset,
            size,
        })
    }
}

/// Round `n` up to the next multiple of [`ALIGNMENT`]
#[must_use]
pub fn align_up(n: usize) -> usize {
    n.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// Write a checkpoint containing the given named tensors, in order
///
/// # Errors
///
/// Returns `IoFailure` if the file cannot be created or written.
pub fn write_checkpoint(
    path: &Path,
    metadata: &CheckpointMetadata,
    tensors: &[(String, Tensor)],
) -> Result<()> {
    let metadata_json =
        serde_json::to_vec(metadata).map_err(|e| CargarError::FormatError {
            reason: format!("Failed to encode metadata: {e}"),
        })?;

    // Lay out the data section first so the index carries final offsets.
    let mut entries = Vec::with_capacity(tensors.len());
    let mut data_cursor = 0usize;
    for (name, tensor) in tensors {
        // Reject anything the reader would refuse to parse back.
        if name.len() > usize::from(u16::MAX) {
            return Err(CargarError::FormatError {
                reason: format!(
                    "Tensor name is {} bytes, index limit is {}",
                    name.len(),
                    u16::MAX
                ),
            });
        }
        if tensor.ndim() > 8 {
            return Err(CargarError::FormatError {
                reason: format!(
                    "Tensor '{name}' has {} dimensions, index limit is 8",
                    tensor.ndim()
                ),
            });
        }
        entries.push(TensorEntry {
            name: name.clone(),
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            offset: data_cursor as u64,
            size: tensor.size_in_bytes() as u64,
        });
        data_cursor = align_up(data_cursor + tensor.size_in_bytes());
    }

    let index: Vec<u8> = entries.iter().flat_map(TensorEntry::to_binary).collect();
    let data_offset = align_up(HEADER_SIZE + metadata_json.len() + index.len());

    let mut out = Vec::with_capacity(data_offset + data_cursor);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(tensors.len() as u32).to_le_bytes());
    out.extend_from_slice(&(metadata_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&(data_offset as u64).to_le_bytes());
    out.extend_from_slice(&metadata_json);
    out.extend_from_slice(&index);
    out.resize(data_offset, 0);

    for ((_, tensor), entry) in tensors.iter().zip(&entries) {
        out.resize(data_offset + entry.offset as usize, 0);
        out.extend_from_slice(&tensor.to_le_bytes());
    }

    let mut file = std::fs::File::create(path).map_err(|e| CargarError::IoFailure {
        name: path.display().to_string(),
        reason: format!("Failed to create checkpoint: {e}"),
    })?;
    file.write_all(&out).map_err(|e| CargarError::IoFailure {
        name: path.display().to_string(),
        reason: format!("Failed to write checkpoint: {e}"),
    })?;
    Ok(())
}

/// Parsed checkpoint structure shared by the full and mapped readers
#[derive(Debug)]
pub(crate) struct CheckpointLayout {
    pub(crate) metadata: CheckpointMetadata,
    pub(crate) entries: Vec<TensorEntry>,
    pub(crate) index: HashMap<String, usize>,
    pub(crate) data_offset: usize,
}

impl CheckpointLayout {
    /// Parse header, metadata, and index from the leading bytes of a file
    pub(crate) fn parse(bytes: &[u8], file_len: usize) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CargarError::FormatError {
                reason: format!(
                    "File too small: {} bytes (minimum {HEADER_SIZE} for header)",
                    bytes.len()
                ),
            });
        }
        if bytes[0..4] != MAGIC {
            return Err(CargarError::FormatError {
                reason: "Bad magic (not a cargar checkpoint)".to_string(),
            });
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));
        if version != VERSION {
            return Err(CargarError::FormatError {
                reason: format!("Unsupported checkpoint version {version}"),
            });
        }
        let tensor_count = u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes")) as usize;
        let metadata_len = u32::from_le_bytes(bytes[12..16].try_into().expect("4 bytes")) as usize;
        let data_offset = u64::from_le_bytes(bytes[16..24].try_into().expect("8 bytes")) as usize;

        if data_offset > file_len || HEADER_SIZE + metadata_len > data_offset {
            return Err(CargarError::FormatError {
                reason: format!(
                    "File truncated: data offset {data_offset}, metadata {metadata_len} bytes, file {file_len} bytes"
                ),
            });
        }

        let metadata: CheckpointMetadata =
            serde_json::from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + metadata_len]).map_err(
                |e| CargarError::FormatError {
                    reason: format!("Failed to parse metadata JSON: {e}"),
                },
            )?;

        let index_bytes = &bytes[HEADER_SIZE + metadata_len..data_offset];
        let mut cursor = Cursor::new(index_bytes);
        let mut entries = Vec::with_capacity(tensor_count);
        let mut index = HashMap::with_capacity(tensor_count);
        for _ in 0..tensor_count {
            let entry = TensorEntry::from_cursor(&mut cursor)?;
            let end = data_offset + entry.offset as usize + entry.size as usize;
            if end > file_len {
                return Err(CargarError::FormatError {
                    reason: format!(
                        "Tensor '{}' extends to byte {end}, file is {file_len} bytes",
                        entry.name
                    ),
                });
            }
            index.insert(entry.name.clone(), entries.len());
            entries.push(entry);
        }

        Ok(Self {
            metadata,
            entries,
            index,
            data_offset,
        })
    }

    pub(crate) fn entry(&self, name: &str) -> Result<&TensorEntry> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| CargarError::MissingParameter {
                name: name.to_string(),
            })
    }
}

/// Fully read checkpoint: the whole file is resident in host memory
///
/// This is the access mode the Naive and Sequential strategies use; its host
/// footprint is the entire file, reported by [`Checkpoint::resident_bytes`].
#[derive(Debug)]
pub struct Checkpoint {
    bytes: Vec<u8>,
    layout: CheckpointLayout,
}

impl Checkpoint {
    /// Read a checkpoint file fully into memory
    ///
    /// # Errors
    ///
    /// Returns `IoFailure` if the file cannot be read and `FormatError` if
    /// its contents do not parse.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| CargarError::IoFailure {
            name: path.display().to_string(),
            reason: format!("Failed to read checkpoint: {e}"),
        })?;
        let layout = CheckpointLayout::parse(&bytes, bytes.len())?;
        Ok(Self { bytes, layout })
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

    /// Host bytes held by this reader (the whole file)
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.bytes.len()
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

    /// Decode one named tensor
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if the name is absent and `FormatError`
    /// if the stored bytes do not decode.
    pub fn read_one(&self, name: &str) -> Result<Tensor> {
        let entry = self.layout.entry(name)?;
        let start = self.layout.data_offset + entry.offset as usize;
        let bytes = &self.bytes[start..start + entry.size as usize];
        Tensor::from_le_bytes(&entry.descriptor(), bytes)
    }

    /// Decode every tensor, in index order
    ///
    /// # Errors
    ///
    /// Returns `FormatError` if any stored tensor does not decode.
    pub fn read_all(&self) -> Result<Vec<(String, Tensor)>> {
        self.layout
            .entries
            .iter()
            .map(|e| Ok((e.name.clone(), self.read_one(&e.name)?)))
            .collect()
    }
}

// Little-endian primitive readers over a cursor.

pub(crate) fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    let mut buf = [0u8; 1];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| CargarError::FormatError {
            reason: format!("read_u8: {e}"),
        })?;
    Ok(buf[0])
}

pub(crate) fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    let mut buf = [0u8; 2];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| CargarError::FormatError {
            reason: format!("read_u16: {e}"),
        })?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut buf = [0u8; 8];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| CargarError::FormatError {
            reason: format!("read_u64: {e}"),
        })?;
    Ok(u64::from_le_bytes(buf))
}
