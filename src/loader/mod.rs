//! Staged parameter loading
//!
//! [`StagedParameterLoader`] moves every named tensor of a store into the
//! matching slots of a [`TargetModel`] on a destination [`Device`]. The
//! five [`LoadStrategy`] values are mutually exclusive linear pipelines
//! that trade peak transient memory between the host and the device:
//!
//! | Strategy        | Host peak                | Device peak            |
//! |-----------------|--------------------------|------------------------|
//! | `Naive`         | full store (file + map)  | model + full store     |
//! | `Sequential`    | full store (file + map)  | model + largest tensor |
//! | `MetaSequential`| largest tensor           | model + full store     |
//! | `MappedAssign`  | page-cache dependent     | model                  |
//! | `PerTensorFile` | largest tensor           | model                  |
//!
//! Staging and device residency are accounted at in-memory (decoded,
//! `f32`-width) size throughout, so the peaks of different strategies are
//! directly comparable; [`LoadReport::bytes_bound`] stays in serialized
//! store bytes.
//!
//! On success every slot holds the store's exact values. Fail-fast
//! strategies stop at the first unresolvable name and leave later slots
//! unbound; permissive strategies skip missing names and report them in
//! the [`LoadReport`]. Shape or dtype mismatches are fatal under every
//! policy. Loading is idempotent: repeating a load re-binds the same
//! values.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::device::{Device, DeviceTensor};
use crate::error::{CargarError, Result};
use crate::model::TargetModel;
use crate::probe::{MemTracker, StageGuard};
use crate::store::mapped::MappedCheckpoint;
use crate::store::split::TensorDir;
use crate::store::Checkpoint;
use crate::tensor::Tensor;

/// Memory-bounding policy for one load operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LoadStrategy {
    /// Full store to host, full store to device, then per-slot copies
    Naive,
    /// Full store to host, one tensor at a time across to the device
    Sequential,
    /// Placeholder model, store streamed straight to device transients
    MetaSequential,
    /// Placeholder model, slots bound from a random-access mapping
    MappedAssign,
    /// Placeholder model, one pre-split file read per slot
    PerTensorFile,
}

impl LoadStrategy {
    /// All strategies, in documentation order
    pub const ALL: [LoadStrategy; 5] = [
        LoadStrategy::Naive,
        LoadStrategy::Sequential,
        LoadStrategy::MetaSequential,
        LoadStrategy::MappedAssign,
        LoadStrategy::PerTensorFile,
    ];

    /// The missing-name policy this strategy uses unless overridden
    #[must_use]
    pub fn default_policy(self) -> MissingPolicy {
        match self {
            LoadStrategy::Sequential | LoadStrategy::MetaSequential => {
                MissingPolicy::SkipWithWarning
            }
            LoadStrategy::Naive | LoadStrategy::MappedAssign | LoadStrategy::PerTensorFile => {
                MissingPolicy::FailFast
            }
        }
    }

    /// Whether this strategy expects a per-tensor directory instead of a
    /// combined checkpoint file
    #[must_use]
    pub fn wants_tensor_dir(self) -> bool {
        matches!(self, LoadStrategy::PerTensorFile)
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadStrategy::Naive => "naive",
            LoadStrategy::Sequential => "sequential",
            LoadStrategy::MetaSequential => "meta-sequential",
            LoadStrategy::MappedAssign => "mapped-assign",
            LoadStrategy::PerTensorFile => "per-tensor-file",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for LoadStrategy {
    type Err = CargarError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "naive" => Ok(LoadStrategy::Naive),
            "sequential" => Ok(LoadStrategy::Sequential),
            "meta-sequential" | "meta" => Ok(LoadStrategy::MetaSequential),
            "mapped-assign" | "mapped" => Ok(LoadStrategy::MappedAssign),
            "per-tensor-file" | "per-tensor" => Ok(LoadStrategy::PerTensorFile),
            other => Err(CargarError::FormatError {
                reason: format!("Unknown strategy '{other}'"),
            }),
        }
    }
}

/// What to do when a required name is absent from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MissingPolicy {
    /// Halt at the first absent name; later slots stay unbound
    FailFast,
    /// Leave the slot's current value, record a coverage warning
    SkipWithWarning,
}

/// Outcome of one load operation
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Strategy that ran
    pub strategy: LoadStrategy,
    /// Missing-name policy in effect
    pub policy: MissingPolicy,
    /// Slots bound with store values
    pub tensors_bound: usize,
    /// Serialized bytes bound into slots
    pub bytes_bound: usize,
    /// Names skipped under `SkipWithWarning` (coverage gaps)
    pub skipped: Vec<String>,
    /// Peak host staging bytes during the operation
    pub host_peak_bytes: usize,
    /// Peak device-resident bytes during the operation
    pub device_peak_bytes: usize,
    /// Wall-clock duration in milliseconds
    pub elapsed_ms: u64,
}

impl LoadReport {
    /// Whether every required slot received a store value
    #[must_use]
    pub fn full_coverage(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Loader binding store tensors into model slots under a chosen strategy
///
/// The loader is the sole mutator of the model's slots during a load; the
/// store is read-only throughout. Host staging is accounted on an internal
/// [`MemTracker`], device residency on the target [`Device`]'s own tracker.
#[derive(Debug)]
pub struct StagedParameterLoader {
    device: Device,
    host: MemTracker,
    policy: Option<MissingPolicy>,
}

impl StagedParameterLoader {
    /// Create a loader targeting `device`
    #[must_use]
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
            host: MemTracker::new(),
            policy: None,
        }
    }

    /// Override the strategy's default missing-name policy
    #[must_use]
    pub fn with_missing_policy(mut self, policy: MissingPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Host staging tracker (for observation)
    #[must_use]
    pub fn host_tracker(&self) -> &MemTracker {
        &self.host
    }

    /// Destination device handle
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Load every model slot from the store at `store_path`
    ///
    /// `store_path` is a combined checkpoint file, except for
    /// [`LoadStrategy::PerTensorFile`] where it is a pre-split directory.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` under `FailFast` when a required name is
    /// absent, `ShapeMismatch`/`DtypeMismatch` on any geometry conflict,
    /// and `IoFailure`/`FormatError` from the underlying store. Slots bound
    /// before a failure remain bound.
    pub fn load(
        &self,
        model: &mut TargetModel,
        store_path: &Path,
        strategy: LoadStrategy,
    ) -> Result<LoadReport> {
        let policy = self.policy.unwrap_or_else(|| strategy.default_policy());
        self.host.reset_peak();
        self.device.reset_peak();
        let start = Instant::now();

        let mut progress = Progress::default();
        match strategy {
            LoadStrategy::Naive => self.load_naive(model, store_path, policy, &mut progress)?,
            LoadStrategy::Sequential => {
                self.load_sequential(model, store_path, policy, &mut progress)?;
            }
            LoadStrategy::MetaSequential => {
                self.load_meta_sequential(model, store_path, policy, &mut progress)?;
            }
            LoadStrategy::MappedAssign => {
                self.load_mapped_assign(model, store_path, policy, &mut progress)?;
            }
            LoadStrategy::PerTensorFile => {
                self.load_per_tensor_file(model, store_path, policy, &mut progress)?;
            }
        }

        Ok(LoadReport {
            strategy,
            policy,
            tensors_bound: progress.bound,
            bytes_bound: progress.bytes,
            skipped: progress.skipped,
            host_peak_bytes: self.host.peak_bytes(),
            device_peak_bytes: self.device.peak_bytes(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Full store to host, full store to device, per-slot copies.
    fn load_naive(
        &self,
        model: &mut TargetModel,
        store_path: &Path,
        policy: MissingPolicy,
        progress: &mut Progress,
    ) -> Result<()> {
        model.materialize_on(&self.device);

        let ckpt = Checkpoint::open(store_path)?;
        let _file_guard = StageGuard::new(&self.host, ckpt.resident_bytes());
        let host_map = read_all_to_map(&ckpt, &self.host)?;

        // The whole mapping crosses to the device before any slot is
        // touched, so the device transiently holds model + store.
        let mut staged: HashMap<String, DeviceTensor> = host_map
            .map
            .iter()
            .map(|(name, tensor)| (name.clone(), DeviceTensor::upload(tensor, &self.device)))
            .collect();

        for name in model.names() {
            match staged.remove(&name) {
                Some(dt) => {
                    model.copy_into(&name, dt.tensor())?;
                    progress.record(dt.size_in_bytes());
                }
                None => progress.handle_missing(&name, policy)?,
            }
        }
        Ok(())
    }

    /// Full store to host, one tensor at a time across to the device.
    fn load_sequential(
        &self,
        model: &mut TargetModel,
        store_path: &Path,
        policy: MissingPolicy,
        progress: &mut Progress,
    ) -> Result<()> {
        model.materialize_on(&self.device);

        let ckpt = Checkpoint::open(store_path)?;
        let _file_guard = StageGuard::new(&self.host, ckpt.resident_bytes());
        let host_map = read_all_to_map(&ckpt, &self.host)?;

        for name in model.names() {
            match host_map.map.get(&name) {
                Some(tensor) => {
                    // One transient device tensor at a time, released
                    // before the next name.
                    let staged = DeviceTensor::upload(tensor, &self.device);
                    model.copy_into(&name, staged.tensor())?;
                    progress.record(staged.size_in_bytes());
                }
                None => progress.handle_missing(&name, policy)?,
            }
        }
        Ok(())
    }

    /// Store streamed straight to device transients, no full host copy.
    fn load_meta_sequential(
        &self,
        model: &mut TargetModel,
        store_path: &Path,
        policy: MissingPolicy,
        progress: &mut Progress,
    ) -> Result<()> {
        model.materialize_on(&self.device);

        let mapped = MappedCheckpoint::open(store_path)?;
        let mut staged: HashMap<String, DeviceTensor> = HashMap::new();
        for entry in mapped.entries() {
            // Decode buffer counts as host staging only until it moves to
            // the device. Accounted at decoded width, not serialized size.
            let decode_guard =
                StageGuard::new(&self.host, entry.descriptor().resident_bytes());
            let tensor = mapped.read_one(&entry.name)?;
            let dt = DeviceTensor::from_tensor(tensor, &self.device);
            drop(decode_guard);
            staged.insert(entry.name.clone(), dt);
        }

        for name in model.names() {
            match staged.remove(&name) {
                Some(dt) => {
                    model.copy_into(&name, dt.tensor())?;
                    progress.record(dt.size_in_bytes());
                    // dt drops here, releasing its device transient before
                    // the next slot.
                }
                None => progress.handle_missing(&name, policy)?,
            }
        }
        Ok(())
    }

    /// Slots bound directly from the random-access mapping.
    fn load_mapped_assign(
        &self,
        model: &mut TargetModel,
        store_path: &Path,
        policy: MissingPolicy,
        progress: &mut Progress,
    ) -> Result<()> {
        let mapped = MappedCheckpoint::open(store_path)?;

        for name in model.names() {
            let desc = match mapped.descriptor(&name) {
                Ok(desc) => desc,
                Err(CargarError::MissingParameter { .. }) => {
                    progress.handle_missing(&name, policy)?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            // Decoded straight from the mapped region into the slot's
            // storage; host residency is whatever the page cache keeps.
            let tensor = Tensor::from_le_bytes(&desc, mapped.tensor_bytes(&name)?)?;
            let bytes = tensor.size_in_bytes();
            model.bind(&name, tensor, &self.device)?;
            progress.record(bytes);
        }
        Ok(())
    }

    /// One pre-split file read per slot, released before the next.
    fn load_per_tensor_file(
        &self,
        model: &mut TargetModel,
        store_path: &Path,
        policy: MissingPolicy,
        progress: &mut Progress,
    ) -> Result<()> {
        model.materialize_on(&self.device);

        let dir = TensorDir::open(store_path)?;
        for name in model.names() {
            match dir.file_size(&name) {
                Ok(_) => {}
                Err(CargarError::MissingParameter { .. }) => {
                    progress.handle_missing(&name, policy)?;
                    continue;
                }
                Err(e) => return Err(e),
            }
            // The staging buffer is one decoded tensor; the slot contract
            // gives its size before the read.
            let _stage_guard =
                StageGuard::new(&self.host, model.descriptor(&name)?.resident_bytes());
            let tensor = dir.read_one(&name)?;
            model.copy_into(&name, &tensor)?;
            progress.record(tensor.size_in_bytes());
            // stage_guard drops here: host staging released before the
            // next name, so host peak never exceeds one tensor.
        }
        Ok(())
    }
}

/// Running totals for one load operation
#[derive(Debug, Default)]
struct Progress {
    bound: usize,
    bytes: usize,
    skipped: Vec<String>,
}

impl Progress {
    fn record(&mut self, bytes: usize) {
        self.bound += 1;
        self.bytes += bytes;
    }

    fn handle_missing(&mut self, name: &str, policy: MissingPolicy) -> Result<()> {
        match policy {
            MissingPolicy::FailFast => Err(CargarError::MissingParameter {
                name: name.to_string(),
            }),
            MissingPolicy::SkipWithWarning => {
                self.skipped.push(name.to_string());
                Ok(())
            }
        }
    }
}

/// Decoded name→tensor mapping whose host footprint is guard-accounted
struct HostMap {
    map: HashMap<String, Tensor>,
    _guard: StageGuard,
}

fn read_all_to_map(ckpt: &Checkpoint, host: &MemTracker) -> Result<HostMap> {
    let tensors = ckpt.read_all()?;
    let total: usize = tensors.iter().map(|(_, t)| t.resident_bytes()).sum();
    let guard = StageGuard::new(host, total);
    Ok(HostMap {
        map: tensors.into_iter().collect(),
        _guard: guard,
    })
}
