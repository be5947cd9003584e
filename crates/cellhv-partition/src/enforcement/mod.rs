// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Enforcement collaborators.
//!
//! The partition core never touches hardware itself. Stage-2 page tables,
//! IOMMU windows and interrupt routing are programmed by an [`Enforcement`]
//! implementation supplied by the embedder. Every operation must be
//! idempotent: the lifecycle controller retries and rolls back freely.


mod bounded;
mod recording;

pub(crate) use bounded::{Pending, spawn_call};
pub use recording::{EnforcementCall, EnforcementOp, RecordingEnforcement};

use crate::descriptor::IrqRouting;
use crate::error::EnforcementError;
use cellhv_abi::{CellId, MemoryRegion};

/// Hardware programming backend.
///
/// Calls may block (e.g. waiting for IOMMU invalidation); the lifecycle
/// controller bounds each call with the platform's enforcement timeout.
pub trait Enforcement: Send + Sync {
    /// Maps a cell's memory regions (stage-2 tables, IOMMU).
    fn apply_memory_layout(
        &self,
        cell: CellId,
        regions: &[MemoryRegion],
    ) -> Result<(), EnforcementError>;

    /// Routes a cell's interrupt pins to it.
    fn apply_irq_routing(&self, cell: CellId, routing: &IrqRouting) -> Result<(), EnforcementError>;

    /// Undoes everything applied for a cell. Must succeed on a cell that was
    /// only partially programmed, or not at all.
    fn release(&self, cell: CellId) -> Result<(), EnforcementError>;
}
