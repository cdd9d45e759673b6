//! CLI command implementations (extracted for testability)
//!
//! `main.rs` stays a thin argument-parsing shell; everything here returns
//! rendered output or an error so commands can be exercised in tests
//! without a process boundary.

use std::path::Path;
use std::time::Duration;

use crate::device::Device;
use crate::error::{CargarError, Result};
use crate::loader::{LoadStrategy, MissingPolicy, StagedParameterLoader};
use crate::model::TargetModel;
use crate::probe::RssSampler;
use crate::store::split::{split_checkpoint, TensorDir};
use crate::store::{write_checkpoint, Checkpoint, CheckpointMetadata};
use crate::tensor::{Dtype, Tensor, TensorDescriptor};

/// Parse a `name=2x3x4` tensor spec
///
/// # Errors
///
/// Returns `FormatError` for a missing `=`, an empty name, or dimensions
/// that do not parse as positive integers.
pub fn parse_tensor_spec(spec: &str) -> Result<(String, Vec<usize>)> {
    let (name, dims) = spec.split_once('=').ok_or_else(|| CargarError::FormatError {
        reason: format!("Tensor spec '{spec}' must look like name=2x3"),
    })?;
    if name.is_empty() {
        return Err(CargarError::FormatError {
            reason: format!("Tensor spec '{spec}' has an empty name"),
        });
    }
    let shape: Vec<usize> = dims
        .split('x')
        .map(|d| {
            d.parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| CargarError::FormatError {
                    reason: format!("Bad dimension '{d}' in tensor spec '{spec}'"),
                })
        })
        .collect::<Result<_>>()?;
    Ok((name.to_string(), shape))
}

/// Generate a synthetic checkpoint with deterministic values
///
/// Each tensor is filled with a per-tensor ramp so loads are verifiable
/// without a random seed.
///
/// # Errors
///
/// Propagates tensor construction and checkpoint write failures.
pub fn generate(
    path: &Path,
    model_name: Option<&str>,
    specs: &[(String, Vec<usize>)],
    dtype: Dtype,
) -> Result<()> {
    let tensors: Vec<(String, Tensor)> = specs
        .iter()
        .enumerate()
        .map(|(i, (name, shape))| {
            let size: usize = shape.iter().product();
            let data = (0..size).map(|j| i as f32 + j as f32 * 0.5).collect();
            Ok((name.clone(), Tensor::from_vec_dtype(shape.clone(), data, dtype)?))
        })
        .collect::<Result<_>>()?;
    let metadata = CheckpointMetadata {
        model_name: model_name.map(ToString::to_string),
        ..CheckpointMetadata::default()
    };
    write_checkpoint(path, &metadata, &tensors)
}

/// Render a checkpoint's index as a listing
///
/// # Errors
///
/// Propagates open and parse failures.
pub fn info(path: &Path) -> Result<String> {
    let ckpt = Checkpoint::open(path)?;
    let mut out = String::new();
    out.push_str(&format!("producer:  {}\n", ckpt.metadata().producer));
    if let Some(name) = &ckpt.metadata().model_name {
        out.push_str(&format!("model:     {name}\n"));
    }
    out.push_str(&format!("tensors:   {}\n", ckpt.tensor_count()));
    let total: u64 = ckpt.entries().iter().map(|e| e.size).sum();
    out.push_str(&format!("data size: {total} bytes\n\n"));
    for entry in ckpt.entries() {
        out.push_str(&format!(
            "{:<32} {:>4} {:?} ({} bytes)\n",
            entry.name,
            entry.dtype.to_string(),
            entry.shape,
            entry.size
        ));
    }
    Ok(out)
}

/// Split a combined checkpoint into a per-tensor directory
///
/// # Errors
///
/// Propagates read and write failures.
pub fn split(checkpoint_path: &Path, dir: &Path) -> Result<String> {
    let ckpt = Checkpoint::open(checkpoint_path)?;
    split_checkpoint(&ckpt, dir)?;
    Ok(format!(
        "Split {} tensors into {}\n",
        ckpt.tensor_count(),
        dir.display()
    ))
}

/// Options for the `load` command
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Override the strategy's default missing-name policy
    pub missing_policy: Option<MissingPolicy>,
    /// Emit the report as JSON instead of a human listing
    pub json: bool,
    /// Poll process RSS on a background thread during the load
    pub sample_rss: bool,
}

/// Construct a model from the store's own descriptors and load it
///
/// # Errors
///
/// Propagates store access failures and every loader error.
pub fn run_load(store_path: &Path, strategy: LoadStrategy, opts: LoadOptions) -> Result<String> {
    let descriptors = store_descriptors(store_path, strategy)?;
    let mut model = TargetModel::with_placeholders(descriptors);
    let device = Device::new("device0");

    let mut loader = StagedParameterLoader::new(&device);
    if let Some(policy) = opts.missing_policy {
        loader = loader.with_missing_policy(policy);
    }

    let sampler = opts
        .sample_rss
        .then(|| RssSampler::start(Duration::from_millis(5)));
    let report = loader.load(&mut model, store_path, strategy)?;
    let rss_peak_kb = sampler.and_then(RssSampler::stop);

    if opts.json {
        let mut value = serde_json::to_value(&report).map_err(|e| CargarError::FormatError {
            reason: format!("Failed to encode report: {e}"),
        })?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("rss_peak_kb".to_string(), serde_json::json!(rss_peak_kb));
        }
        return serde_json::to_string_pretty(&value).map_err(|e| CargarError::FormatError {
            reason: format!("Failed to encode report: {e}"),
        });
    }

    let mut out = String::new();
    out.push_str(&format!("strategy:      {}\n", report.strategy));
    out.push_str(&format!("tensors bound: {}\n", report.tensors_bound));
    out.push_str(&format!("bytes bound:   {}\n", report.bytes_bound));
    out.push_str(&format!("host peak:     {} bytes\n", report.host_peak_bytes));
    out.push_str(&format!(
        "device peak:   {} bytes\n",
        report.device_peak_bytes
    ));
    out.push_str(&format!("elapsed:       {} ms\n", report.elapsed_ms));
    if let Some(kb) = rss_peak_kb {
        out.push_str(&format!("rss peak:      {kb} kB\n"));
    }
    for name in &report.skipped {
        out.push_str(&format!("warning: parameter '{name}' missing, slot kept its value\n"));
    }
    Ok(out)
}

fn store_descriptors(store_path: &Path, strategy: LoadStrategy) -> Result<Vec<TensorDescriptor>> {
    if strategy.wants_tensor_dir() {
        let dir = TensorDir::open(store_path)?;
        dir.names()?
            .iter()
            .map(|name| dir.descriptor(name))
            .collect()
    } else {
        let ckpt = Checkpoint::open(store_path)?;
        Ok(ckpt
            .entries()
            .iter()
            .map(crate::store::TensorEntry::descriptor)
            .collect())
    }
}
