//! Target model: an ordered set of named parameter slots
//!
//! A slot begins life either as a placeholder (declared shape/dtype, zero
//! backing footprint) or materialized with default values on a device. The
//! loader transitions each slot to materialized-with-loaded-values exactly
//! once per load.

use std::collections::HashMap;

use crate::device::{Device, DeviceTensor};
use crate::error::{CargarError, Result};
use crate::tensor::{Tensor, TensorDescriptor};

/// One named parameter slot
#[derive(Debug)]
pub enum Slot {
    /// Declared geometry, no backing storage
    Placeholder(TensorDescriptor),
    /// Backed storage on a device
    Materialized(DeviceTensor),
}

impl Slot {
    /// Declared or resident geometry of this slot
    #[must_use]
    pub fn descriptor(&self, name: &str) -> TensorDescriptor {
        match self {
            Slot::Placeholder(desc) => desc.clone(),
            Slot::Materialized(dt) => dt.tensor().descriptor(name),
        }
    }

    /// Whether the slot has backing storage
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        matches!(self, Slot::Materialized(_))
    }
}

/// Named mapping of parameter slots with a stable declaration order
#[derive(Debug)]
pub struct TargetModel {
    slots: Vec<(String, Slot)>,
    index: HashMap<String, usize>,
}

impl TargetModel {
    /// Declare a model whose slots are all placeholders
    #[must_use]
    pub fn with_placeholders(descriptors: Vec<TensorDescriptor>) -> Self {
        let mut slots = Vec::with_capacity(descriptors.len());
        let mut index = HashMap::with_capacity(descriptors.len());
        for desc in descriptors {
            index.insert(desc.name.clone(), slots.len());
            slots.push((desc.name.clone(), Slot::Placeholder(desc)));
        }
        Self { slots, index }
    }

    /// Declare a model with zero-initialized storage on `device`
    #[must_use]
    pub fn with_default_values(descriptors: Vec<TensorDescriptor>, device: &Device) -> Self {
        let mut model = Self::with_placeholders(descriptors);
        model.materialize_on(device);
        model
    }

    /// Convert every placeholder slot to backed storage on `device`
    ///
    /// Contents of newly backed slots are unspecified until the first bind
    /// or copy; already materialized slots are left untouched.
    pub fn materialize_on(&mut self, device: &Device) {
        for (_, slot) in &mut self.slots {
            if let Slot::Placeholder(desc) = slot {
                let desc = desc.clone();
                *slot = Slot::Materialized(DeviceTensor::uninit(&desc, device));
            }
        }
    }

    /// Number of slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the model has no slots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot names in declaration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Descriptors in declaration order
    #[must_use]
    pub fn descriptors(&self) -> Vec<TensorDescriptor> {
        self.slots
            .iter()
            .map(|(name, slot)| slot.descriptor(name))
            .collect()
    }

    /// Total serialized size of all slots in bytes
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.descriptors().iter().map(TensorDescriptor::size_in_bytes).sum()
    }

    /// Look up a slot
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.index.get(name).map(|&i| &self.slots[i].1)
    }

    /// Resident values of a materialized slot
    #[must_use]
    pub fn slot_values(&self, name: &str) -> Option<&[f32]> {
        match self.slot(name)? {
            Slot::Materialized(dt) => Some(dt.tensor().data()),
            Slot::Placeholder(_) => None,
        }
    }

    /// Declared geometry of a slot
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if the model has no slot named `name`.
    pub fn descriptor(&self, name: &str) -> Result<TensorDescriptor> {
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| CargarError::MissingParameter {
                name: name.to_string(),
            })?;
        let (slot_name, slot) = &self.slots[i];
        Ok(slot.descriptor(slot_name))
    }

    /// Copy `tensor`'s values into the materialized slot `name`
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` for an unknown slot, `InvalidSlotState`
    /// for a placeholder slot, and `ShapeMismatch`/`DtypeMismatch` if the
    /// tensor does not satisfy the slot's contract.
    pub fn copy_into(&mut self, name: &str, tensor: &Tensor) -> Result<()> {
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| CargarError::MissingParameter {
                name: name.to_string(),
            })?;
        match &mut self.slots[i].1 {
            Slot::Materialized(dt) => dt.copy_from(name, tensor),
            Slot::Placeholder(_) => Err(CargarError::InvalidSlotState {
                name: name.to_string(),
                reason: "Cannot copy into a placeholder slot; materialize first".to_string(),
            }),
        }
    }

    /// Bind a tensor as the slot's storage on `device`
    ///
    /// Unlike [`TargetModel::copy_into`], this replaces the slot's backing
    /// storage outright (placeholder or materialized), which is how the
    /// MappedAssign strategy attaches store entries without a staging copy.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` for an unknown slot and
    /// `ShapeMismatch`/`DtypeMismatch` if the tensor does not satisfy the
    /// slot's declared contract.
    pub fn bind(&mut self, name: &str, tensor: Tensor, device: &Device) -> Result<()> {
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| CargarError::MissingParameter {
                name: name.to_string(),
            })?;
        let (slot_name, slot) = &self.slots[i];
        slot.descriptor(slot_name).check(&tensor)?;
        self.slots[i].1 = Slot::Materialized(DeviceTensor::from_tensor(tensor, device));
        Ok(())
    }

    /// Whether every slot is materialized
    #[must_use]
    pub fn fully_materialized(&self) -> bool {
        self.slots.iter().all(|(_, slot)| slot.is_materialized())
    }
}
