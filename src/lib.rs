//! # Cargar
//!
//! Cargar (Spanish: "to load") copies large sets of named tensors from
//! persistent storage into a compute device's memory while bounding peak
//! transient usage on both the host and the device.
//!
//! The core is [`loader::StagedParameterLoader`], which binds every slot of
//! a [`model::TargetModel`] from a checkpoint store under one of five
//! [`loader::LoadStrategy`] policies. Each strategy is a linear pipeline
//! with a different host/device peak-memory profile; the accounting that
//! makes those profiles observable lives in [`probe`].
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use cargar::device::Device;
//! use cargar::loader::{LoadStrategy, StagedParameterLoader};
//! use cargar::model::TargetModel;
//! use cargar::store::Checkpoint;
//!
//! # fn main() -> cargar::error::Result<()> {
//! let path = Path::new("model.ckpt");
//! let ckpt = Checkpoint::open(path)?;
//! let descriptors = ckpt.entries().iter().map(|e| e.descriptor()).collect();
//!
//! let device = Device::new("device0");
//! let mut model = TargetModel::with_placeholders(descriptors);
//! let loader = StagedParameterLoader::new(&device);
//! let report = loader.load(&mut model, path, LoadStrategy::Sequential)?;
//! println!("device peak: {} bytes", report.device_peak_bytes);
//! # Ok(())
//! # }
//! ```
//!
//! ## Memory spaces
//!
//! Placement is explicit throughout: every allocation names the
//! [`device::Device`] it lands on, and transient host staging is accounted
//! against the loader's own tracker. A background
//! [`probe::RssSampler`] can observe process RSS during a load; it is
//! read-only instrumentation and never steers the pipeline.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)] // u64 -> usize offsets are checked against file size
#![allow(clippy::cast_precision_loss)] // usize -> f32 for synthetic fill values
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

/// CLI command implementations (extracted for testability)
pub mod cli;
/// Device handles and device-resident tensors
pub mod device;
/// Error taxonomy and result alias
pub mod error;
/// Staged parameter loading strategies
pub mod loader;
/// Target model with named parameter slots
pub mod model;
/// Memory accounting and RSS sampling
pub mod probe;
/// Checkpoint store: combined file, mapped, and per-tensor layouts
pub mod store;
/// Tensor and descriptor types
pub mod tensor;

pub use error::{CargarError, Result};
pub use tensor::Tensor;
