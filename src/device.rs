//! Device handles and device-resident tensors
//!
//! Placement is always explicit: every allocation names the [`Device`] it
//! lands on, and the handle is threaded through calls rather than read from
//! ambient state. A [`Device`] is a logical memory space with shared
//! accounting; [`DeviceTensor`] is storage resident on one, released from
//! the accounting when dropped.

use std::fmt;

use crate::error::Result;
use crate::probe::MemTracker;
use crate::tensor::{Tensor, TensorDescriptor};

/// Handle to one logical memory space
///
/// Cheap to clone; clones share the same accounting.
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    tracker: MemTracker,
}

impl Device {
    /// Create a device with the given name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracker: MemTracker::new(),
        }
    }

    /// Device name (for diagnostics)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accounting tracker for this device's memory space
    #[must_use]
    pub fn tracker(&self) -> &MemTracker {
        &self.tracker
    }

    /// Bytes currently resident on this device
    #[must_use]
    pub fn current_bytes(&self) -> usize {
        self.tracker.current_bytes()
    }

    /// Peak simultaneous resident bytes since the last reset
    #[must_use]
    pub fn peak_bytes(&self) -> usize {
        self.tracker.peak_bytes()
    }

    /// Reset the peak to the current resident size
    pub fn reset_peak(&self) {
        self.tracker.reset_peak();
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Tensor resident on a specific device
///
/// Creation records the allocation against the device; `Drop` releases it,
/// so the accounting window matches the storage lifetime. Accounting uses
/// the in-memory (`f32`-width) size, matching the backing storage rather
/// than the serialized dtype width.
#[derive(Debug)]
pub struct DeviceTensor {
    tensor: Tensor,
    device: Device,
}

impl DeviceTensor {
    /// Copy a host tensor onto `device`
    #[must_use]
    pub fn upload(src: &Tensor, device: &Device) -> Self {
        device.tracker().record_alloc(src.resident_bytes());
        Self {
            tensor: src.clone(),
            device: device.clone(),
        }
    }

    /// Move a host tensor onto `device` without copying the values
    #[must_use]
    pub fn from_tensor(tensor: Tensor, device: &Device) -> Self {
        device.tracker().record_alloc(tensor.resident_bytes());
        Self {
            tensor,
            device: device.clone(),
        }
    }

    /// Allocate storage matching `desc` with unspecified contents
    ///
    /// Shape and dtype are correct; the values are meaningless until the
    /// first copy into the slot.
    #[must_use]
    pub fn uninit(desc: &TensorDescriptor, device: &Device) -> Self {
        Self::from_tensor(Tensor::zeros(desc), device)
    }

    /// Allocate zero-initialized storage matching `desc`
    #[must_use]
    pub fn zeros(desc: &TensorDescriptor, device: &Device) -> Self {
        Self::from_tensor(Tensor::zeros(desc), device)
    }

    /// Overwrite this tensor's values in place from `src`
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch`/`DtypeMismatch` (attributed to `name`) if
    /// `src` differs in geometry.
    pub fn copy_from(&mut self, name: &str, src: &Tensor) -> Result<()> {
        self.tensor.copy_from(name, src)
    }

    /// The resident values
    #[must_use]
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Device this tensor lives on
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Serialized size of the resident values in bytes
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.tensor.size_in_bytes()
    }

    /// In-memory size in bytes, the amount accounted against the device
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.tensor.resident_bytes()
    }
}

impl Drop for DeviceTensor {
    fn drop(&mut self) {
        self.device.tracker().record_free(self.tensor.resident_bytes());
    }
}
