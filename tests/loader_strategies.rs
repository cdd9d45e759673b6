//! End-to-end coverage of the five load strategies
//!
//! Exercises round-trip fidelity, missing-name behavior per policy, peak
//! memory ordering between strategies, and idempotence, all against real
//! checkpoint files in temp storage.

use std::path::Path;

use proptest::prelude::*;
use tempfile::{NamedTempFile, TempDir};

use cargar::device::Device;
use cargar::error::CargarError;
use cargar::loader::{LoadReport, LoadStrategy, MissingPolicy, StagedParameterLoader};
use cargar::model::TargetModel;
use cargar::store::split::split_checkpoint;
use cargar::store::{write_checkpoint, Checkpoint, CheckpointMetadata};
use cargar::tensor::{Dtype, Tensor, TensorDescriptor};

// ============================================================================
// Helpers
// ============================================================================

/// Deterministic fill so loaded values are verifiable per name
fn fill(tensor_idx: usize, elem_idx: usize) -> f32 {
    (tensor_idx * 100 + elem_idx) as f32 * 0.25
}

/// Shared fixture: three parameters of sizes {10, 20, 30}
fn scenario_tensors() -> Vec<(String, Tensor)> {
    [("p.small", 10usize), ("p.medium", 20), ("p.large", 30)]
        .iter()
        .enumerate()
        .map(|(i, &(name, size))| {
            let data = (0..size).map(|j| fill(i, j)).collect();
            (
                name.to_string(),
                Tensor::from_vec(vec![size], data).unwrap(),
            )
        })
        .collect()
}

fn write_scenario(path: &Path, tensors: &[(String, Tensor)]) {
    write_checkpoint(path, &CheckpointMetadata::default(), tensors).unwrap();
}

fn descriptors_of(tensors: &[(String, Tensor)]) -> Vec<TensorDescriptor> {
    tensors
        .iter()
        .map(|(name, t)| t.descriptor(name.clone()))
        .collect()
}

/// Load `path` under `strategy` into a fresh placeholder model
fn load_fresh(
    descriptors: Vec<TensorDescriptor>,
    path: &Path,
    strategy: LoadStrategy,
) -> (TargetModel, Device, LoadReport) {
    let device = Device::new("device0");
    let mut model = TargetModel::with_placeholders(descriptors);
    let loader = StagedParameterLoader::new(&device);
    let report = loader.load(&mut model, path, strategy).unwrap();
    (model, device, report)
}

/// Split a checkpoint into a fresh per-tensor directory
fn split_to_dir(ckpt_path: &Path) -> TempDir {
    let ckpt = Checkpoint::open(ckpt_path).unwrap();
    let dir = TempDir::new().unwrap();
    split_checkpoint(&ckpt, dir.path()).unwrap();
    dir
}

fn assert_values_match(model: &TargetModel, tensors: &[(String, Tensor)]) {
    for (name, expected) in tensors {
        let got = model
            .slot_values(name)
            .unwrap_or_else(|| panic!("slot '{name}' not materialized"));
        assert_eq!(got, expected.data(), "values differ for '{name}'");
    }
}

// ============================================================================
// Round-trip fidelity
// ============================================================================

#[test]
fn all_strategies_reproduce_store_values_exactly() {
    let tensors = scenario_tensors();
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);
    let dir = split_to_dir(temp.path());

    for strategy in LoadStrategy::ALL {
        let path = if strategy.wants_tensor_dir() {
            dir.path()
        } else {
            temp.path()
        };
        let (model, _device, report) = load_fresh(descriptors_of(&tensors), path, strategy);
        assert_eq!(report.tensors_bound, 3, "{strategy} bound count");
        assert!(report.full_coverage(), "{strategy} coverage");
        assert!(model.fully_materialized(), "{strategy} materialization");
        assert_values_match(&model, &tensors);
    }
}

#[test]
fn slot_shapes_unchanged_after_load() {
    let tensors = scenario_tensors();
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);

    let (model, _device, _report) =
        load_fresh(descriptors_of(&tensors), temp.path(), LoadStrategy::Naive);
    for (name, expected) in &tensors {
        assert_eq!(model.descriptor(name).unwrap().shape, expected.shape());
    }
}

// ============================================================================
// Missing-name behavior per strategy
// ============================================================================

/// Store covering all but "p.medium"
fn incomplete_store(temp: &NamedTempFile) -> Vec<(String, Tensor)> {
    let tensors = scenario_tensors();
    let partial: Vec<_> = tensors
        .iter()
        .filter(|(name, _)| name != "p.medium")
        .cloned()
        .collect();
    write_scenario(temp.path(), &partial);
    tensors
}

#[test]
fn sequential_skips_missing_with_one_warning() {
    let temp = NamedTempFile::new().unwrap();
    let all = incomplete_store(&temp);

    let device = Device::new("device0");
    let mut model = TargetModel::with_default_values(descriptors_of(&all), &device);
    let loader = StagedParameterLoader::new(&device);
    let report = loader
        .load(&mut model, temp.path(), LoadStrategy::Sequential)
        .unwrap();

    assert_eq!(report.skipped, vec!["p.medium"]);
    assert_eq!(report.tensors_bound, 2);
    // Skipped slot keeps its pre-load (default) value.
    assert_eq!(model.slot_values("p.medium").unwrap(), &[0.0; 20][..]);
    // Covered slots carry store values.
    assert_eq!(
        model.slot_values("p.small").unwrap(),
        all[0].1.data(),
        "covered slot must hold store values"
    );
}

#[test]
fn meta_sequential_skips_missing_with_one_warning() {
    let temp = NamedTempFile::new().unwrap();
    let all = incomplete_store(&temp);

    let (model, _device, report) = {
        let device = Device::new("device0");
        let mut model = TargetModel::with_placeholders(descriptors_of(&all));
        let loader = StagedParameterLoader::new(&device);
        let report = loader
            .load(&mut model, temp.path(), LoadStrategy::MetaSequential)
            .unwrap();
        (model, device, report)
    };

    assert_eq!(report.skipped, vec!["p.medium"]);
    assert!(model.fully_materialized());
}

#[test]
fn naive_fails_fast_and_leaves_later_slots_untouched() {
    let temp = NamedTempFile::new().unwrap();
    let all = incomplete_store(&temp);

    let device = Device::new("device0");
    let mut model = TargetModel::with_default_values(descriptors_of(&all), &device);
    let loader = StagedParameterLoader::new(&device);
    let err = loader
        .load(&mut model, temp.path(), LoadStrategy::Naive)
        .unwrap_err();

    assert!(matches!(err, CargarError::MissingParameter { name } if name == "p.medium"));
    // Slot before the failure is bound and stays bound (no rollback).
    assert_eq!(model.slot_values("p.small").unwrap(), all[0].1.data());
    // Slot after the failing name was never reached.
    assert_eq!(model.slot_values("p.large").unwrap(), &[0.0; 30][..]);
}

#[test]
fn per_tensor_file_fails_fast_on_missing_file() {
    let temp = NamedTempFile::new().unwrap();
    let all = incomplete_store(&temp);
    let dir = split_to_dir(temp.path());

    let device = Device::new("device0");
    let mut model = TargetModel::with_placeholders(descriptors_of(&all));
    let loader = StagedParameterLoader::new(&device);
    let err = loader
        .load(&mut model, dir.path(), LoadStrategy::PerTensorFile)
        .unwrap_err();

    assert!(matches!(err, CargarError::MissingParameter { name } if name == "p.medium"));
    assert_eq!(model.slot_values("p.small").unwrap(), all[0].1.data());
}

#[test]
fn mapped_assign_fails_fast_and_leaves_later_placeholders() {
    let temp = NamedTempFile::new().unwrap();
    let all = incomplete_store(&temp);

    let device = Device::new("device0");
    let mut model = TargetModel::with_placeholders(descriptors_of(&all));
    let loader = StagedParameterLoader::new(&device);
    let err = loader
        .load(&mut model, temp.path(), LoadStrategy::MappedAssign)
        .unwrap_err();

    assert!(matches!(err, CargarError::MissingParameter { .. }));
    assert!(model.slot_values("p.small").is_some());
    assert!(model.slot_values("p.large").is_none(), "never reached");
}

#[test]
fn policy_override_makes_naive_permissive() {
    let temp = NamedTempFile::new().unwrap();
    let all = incomplete_store(&temp);

    let device = Device::new("device0");
    let mut model = TargetModel::with_default_values(descriptors_of(&all), &device);
    let loader =
        StagedParameterLoader::new(&device).with_missing_policy(MissingPolicy::SkipWithWarning);
    let report = loader
        .load(&mut model, temp.path(), LoadStrategy::Naive)
        .unwrap();

    assert_eq!(report.skipped, vec!["p.medium"]);
    assert_eq!(report.tensors_bound, 2);
}

#[test]
fn policy_override_makes_sequential_strict() {
    let temp = NamedTempFile::new().unwrap();
    let all = incomplete_store(&temp);

    let device = Device::new("device0");
    let mut model = TargetModel::with_default_values(descriptors_of(&all), &device);
    let loader = StagedParameterLoader::new(&device).with_missing_policy(MissingPolicy::FailFast);
    let err = loader
        .load(&mut model, temp.path(), LoadStrategy::Sequential)
        .unwrap_err();
    assert!(matches!(err, CargarError::MissingParameter { .. }));
}

// ============================================================================
// Geometry conflicts are fatal under every policy
// ============================================================================

#[test]
fn shape_mismatch_halts_even_permissive_strategies() {
    let tensors = scenario_tensors();
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);

    // Model declares the wrong shape for p.medium.
    let mut descs = descriptors_of(&tensors);
    descs[1].shape = vec![4, 5];

    for strategy in [LoadStrategy::Sequential, LoadStrategy::MetaSequential] {
        let device = Device::new("device0");
        let mut model = TargetModel::with_placeholders(descs.clone());
        let loader = StagedParameterLoader::new(&device);
        let err = loader.load(&mut model, temp.path(), strategy).unwrap_err();
        assert!(
            matches!(err, CargarError::ShapeMismatch { ref name, .. } if name == "p.medium"),
            "{strategy}: {err}"
        );
    }
}

#[test]
fn dtype_mismatch_is_fatal_for_mapped_assign() {
    let tensors = scenario_tensors();
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);

    let mut descs = descriptors_of(&tensors);
    descs[0].dtype = Dtype::F16;

    let device = Device::new("device0");
    let mut model = TargetModel::with_placeholders(descs);
    let loader = StagedParameterLoader::new(&device);
    let err = loader
        .load(&mut model, temp.path(), LoadStrategy::MappedAssign)
        .unwrap_err();
    assert!(matches!(err, CargarError::DtypeMismatch { .. }));
}

// ============================================================================
// Peak-memory ordering
// ============================================================================

#[test]
fn peak_memory_ordering_across_strategies() {
    let tensors = scenario_tensors();
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);
    let dir = split_to_dir(temp.path());

    let mut reports = std::collections::HashMap::new();
    for strategy in LoadStrategy::ALL {
        let path = if strategy.wants_tensor_dir() {
            dir.path()
        } else {
            temp.path()
        };
        let (_model, _device, report) = load_fresh(descriptors_of(&tensors), path, strategy);
        reports.insert(strategy, report);
    }

    let host = |s: LoadStrategy| reports[&s].host_peak_bytes;
    let device = |s: LoadStrategy| reports[&s].device_peak_bytes;

    // Host ordering: per-tensor staging is bounded by one tensor;
    // streaming to device beats holding the decoded store; the full-read
    // strategies are the ceiling.
    assert!(host(LoadStrategy::PerTensorFile) <= host(LoadStrategy::MetaSequential));
    assert!(host(LoadStrategy::MetaSequential) <= host(LoadStrategy::Sequential));
    assert!(host(LoadStrategy::Sequential) <= host(LoadStrategy::Naive));
    assert!(host(LoadStrategy::PerTensorFile) < host(LoadStrategy::Naive));

    // Device ordering: one staged tensor at a time beats landing the whole
    // store on the device first.
    assert!(device(LoadStrategy::Sequential) <= device(LoadStrategy::Naive));
    assert!(device(LoadStrategy::Sequential) <= device(LoadStrategy::MetaSequential));

    // MappedAssign and PerTensorFile keep the device at exactly one model.
    let model_bytes: usize = tensors.iter().map(|(_, t)| t.size_in_bytes()).sum();
    assert_eq!(device(LoadStrategy::MappedAssign), model_bytes);
    assert_eq!(device(LoadStrategy::PerTensorFile), model_bytes);
}

#[test]
fn per_tensor_host_peak_bounded_by_largest_tensor() {
    let tensors = scenario_tensors();
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);
    let dir = split_to_dir(temp.path());

    let (_model, _device, report) = load_fresh(
        descriptors_of(&tensors),
        dir.path(),
        LoadStrategy::PerTensorFile,
    );

    // Largest tensor is 30 elements, so staging never exceeds 120 bytes
    // regardless of total store size.
    let largest: usize = tensors
        .iter()
        .map(|(_, t)| t.resident_bytes())
        .max()
        .unwrap();
    assert_eq!(largest, 120);
    assert!(report.host_peak_bytes <= largest);
}

#[test]
fn meta_sequential_stages_f16_at_decoded_width() {
    // An F16 store serializes at half width, but the decode buffer is a
    // full-width f32 vector and must be accounted as such.
    let tensors = vec![(
        "h.weight".to_string(),
        Tensor::from_vec_dtype(vec![8], vec![1.0; 8], Dtype::F16).unwrap(),
    )];
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);

    let (_model, _device, report) = load_fresh(
        descriptors_of(&tensors),
        temp.path(),
        LoadStrategy::MetaSequential,
    );

    assert_eq!(report.bytes_bound, 16, "serialized bytes moved");
    assert_eq!(report.host_peak_bytes, 32, "decoded staging bytes");
}

#[test]
fn sequential_device_peak_is_model_plus_largest_tensor() {
    let tensors = scenario_tensors();
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);

    let (_model, device, report) = load_fresh(
        descriptors_of(&tensors),
        temp.path(),
        LoadStrategy::Sequential,
    );

    let model_bytes: usize = tensors.iter().map(|(_, t)| t.size_in_bytes()).sum();
    let largest: usize = tensors
        .iter()
        .map(|(_, t)| t.size_in_bytes())
        .max()
        .unwrap();
    assert_eq!(report.device_peak_bytes, model_bytes + largest);
    // Transients are gone: only the model remains resident.
    assert_eq!(device.current_bytes(), model_bytes);
}

#[test]
fn naive_device_peak_is_twice_model_for_full_coverage() {
    let tensors = scenario_tensors();
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);

    let (_model, _device, report) =
        load_fresh(descriptors_of(&tensors), temp.path(), LoadStrategy::Naive);
    let model_bytes: usize = tensors.iter().map(|(_, t)| t.size_in_bytes()).sum();
    assert_eq!(report.device_peak_bytes, 2 * model_bytes);
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn loading_twice_yields_identical_values() {
    let tensors = scenario_tensors();
    let temp = NamedTempFile::new().unwrap();
    write_scenario(temp.path(), &tensors);

    let device = Device::new("device0");
    let mut model = TargetModel::with_placeholders(descriptors_of(&tensors));
    let loader = StagedParameterLoader::new(&device);

    let first = loader
        .load(&mut model, temp.path(), LoadStrategy::Sequential)
        .unwrap();
    let second = loader
        .load(&mut model, temp.path(), LoadStrategy::Sequential)
        .unwrap();

    assert_eq!(first.tensors_bound, second.tensors_bound);
    assert_values_match(&model, &tensors);
    // No accumulation of device residency across repeats.
    let model_bytes: usize = tensors.iter().map(|(_, t)| t.size_in_bytes()).sum();
    assert_eq!(device.current_bytes(), model_bytes);
}

// ============================================================================
// Coverage warnings match the missing set exactly
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sequential_warnings_equal_missing_subset(mask in proptest::collection::vec(any::<bool>(), 5)) {
        let tensors: Vec<(String, Tensor)> = (0..5)
            .map(|i| {
                let data = (0..4).map(|j| fill(i, j)).collect();
                (format!("p.{i}"), Tensor::from_vec(vec![4], data).unwrap())
            })
            .collect();
        let present: Vec<(String, Tensor)> = tensors
            .iter()
            .zip(&mask)
            .filter(|(_, &keep)| keep)
            .map(|(t, _)| t.clone())
            .collect();

        let temp = NamedTempFile::new().unwrap();
        write_scenario(temp.path(), &present);

        let device = Device::new("device0");
        let mut model = TargetModel::with_default_values(descriptors_of(&tensors), &device);
        let loader = StagedParameterLoader::new(&device);
        let report = loader
            .load(&mut model, temp.path(), LoadStrategy::Sequential)
            .unwrap();

        let expected_missing: Vec<String> = tensors
            .iter()
            .zip(&mask)
            .filter(|(_, &keep)| !keep)
            .map(|(t, _)| t.0.clone())
            .collect();
        prop_assert_eq!(report.skipped, expected_missing);
        prop_assert_eq!(report.tensors_bound, present.len());
    }
}
