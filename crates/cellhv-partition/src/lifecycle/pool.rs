// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Resources held by loaded cells.

use crate::cpu::CpuSet;
use crate::descriptor::CellDescriptor;
use crate::validator::PinArena;
use cellhv_abi::{CellId, MemoryRegion};
use std::collections::BTreeMap;

/// Resources claimed by one cell.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Claim {
    cpus: CpuSet,
    regions: Vec<MemoryRegion>,
    pins: PinArena,
}

/// Tracks which cells currently hold their CPUs, memory and pins.
///
/// A cell claims its resources when it is loaded and returns them when it
/// is destroyed. Everything not claimed is free. Claims always come from a
/// validated snapshot, so they never overlap.
#[derive(Debug, Default)]
pub(crate) struct ResourcePool {
    claims: BTreeMap<CellId, Claim>,
}

impl ResourcePool {
    pub(crate) const fn new() -> Self {
        Self {
            claims: BTreeMap::new(),
        }
    }

    pub(crate) fn claim(&mut self, id: CellId, desc: &CellDescriptor) {
        let claim = Claim {
            cpus: desc.cpu_set.clone(),
            regions: desc
                .memory_regions
                .iter()
                .filter(|region| region.is_physically_backed())
                .copied()
                .collect(),
            pins: PinArena::from_routing(&desc.irq_routing),
        };
        self.claims.insert(id, claim);
    }

    /// Returns `false` if the cell held nothing.
    pub(crate) fn release(&mut self, id: CellId) -> bool {
        self.claims.remove(&id).is_some()
    }

    pub(crate) fn is_claimed(&self, id: CellId) -> bool {
        self.claims.contains_key(&id)
    }

    pub(crate) fn claimed_cpus(&self) -> CpuSet {
        let mut cpus = CpuSet::new();
        for claim in self.claims.values() {
            cpus.union_with(&claim.cpus);
        }
        cpus
    }

    pub(crate) fn claimed_regions(&self) -> impl Iterator<Item = (CellId, &MemoryRegion)> + '_ {
        self.claims
            .iter()
            .flat_map(|(id, claim)| claim.regions.iter().map(move |region| (*id, region)))
    }

    pub(crate) fn claimed_pin_count(&self) -> u32 {
        self.claims.values().map(|claim| claim.pins.pin_count()).sum()
    }
}
