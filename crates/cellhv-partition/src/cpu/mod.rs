// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! CPU identity resolution.
//!
//! Hardware processor identifiers are platform encoded: MPIDR affinity
//! values on ARM, APIC IDs on x86. They are sparse and multi-field. Every
//! other component works on dense logical indices instead, so CPU sets are
//! plain bitmaps and ownership checks are array lookups.
//!
//! The mapping is fixed once at discovery: the first discovered processor
//! becomes index 0, the next index 1, and so on. A [`CpuResolver`] is
//! immutable afterwards and can be shared between threads without locking.

mod set;


pub use set::CpuSet;

use crate::error::ResolverError;
use cellhv_abi::{CpuIndex, PhysCpuId};
use std::collections::HashMap;
use tracing::debug;

/// Bidirectional map between hardware CPU IDs and logical indices.
#[derive(Clone, Debug)]
pub struct CpuResolver {
    /// Hardware ID per logical index.
    ids: Vec<PhysCpuId>,
    /// Logical index per hardware ID.
    by_id: HashMap<PhysCpuId, CpuIndex>,
}

impl CpuResolver {
    /// Registers processors in discovery order.
    ///
    /// # Errors
    ///
    /// - [`ResolverError::DuplicateProcessor`] if an ID is discovered twice
    /// - [`ResolverError::NoProcessors`] if discovery found nothing
    pub fn from_discovered<I>(discovered: I) -> Result<Self, ResolverError>
    where
        I: IntoIterator<Item = PhysCpuId>,
    {
        let mut ids = Vec::new();
        let mut by_id = HashMap::new();
        for (phys, index) in discovered.into_iter().zip(0u32..) {
            if by_id.insert(phys, CpuIndex::new(index)).is_some() {
                return Err(ResolverError::DuplicateProcessor(phys));
            }
            ids.push(phys);
        }
        if ids.is_empty() {
            return Err(ResolverError::NoProcessors);
        }
        debug!(cpus = ids.len(), "cpu resolver initialized");
        Ok(Self { ids, by_id })
    }

    /// Returns the logical index of a hardware processor ID.
    ///
    /// # Errors
    ///
    /// [`ResolverError::UnknownProcessor`] if the ID was never registered.
    pub fn resolve(&self, phys: PhysCpuId) -> Result<CpuIndex, ResolverError> {
        self.by_id
            .get(&phys)
            .copied()
            .ok_or(ResolverError::UnknownProcessor(phys))
    }

    /// Returns the hardware ID behind a logical index.
    ///
    /// # Errors
    ///
    /// [`ResolverError::InvalidIndex`] if the index is out of range.
    pub fn identity_of(&self, index: CpuIndex) -> Result<PhysCpuId, ResolverError> {
        self.ids
            .get(index.as_usize())
            .copied()
            .ok_or(ResolverError::InvalidIndex {
                index,
                count: self.ids.len(),
            })
    }

    /// Returns the number of registered processors.
    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.ids.len()
    }

    /// Checks if `index` is a registered logical index.
    #[must_use]
    pub fn contains(&self, index: CpuIndex) -> bool {
        index.as_usize() < self.ids.len()
    }

    /// Iterates `(logical index, hardware ID)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (CpuIndex, PhysCpuId)> + '_ {
        self.ids
            .iter()
            .zip(0u32..)
            .map(|(&phys, index)| (CpuIndex::new(index), phys))
    }

    /// Returns the set of every registered CPU.
    #[must_use]
    pub fn all_cpus(&self) -> CpuSet {
        self.iter().map(|(index, _)| index).collect()
    }
}
