// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Partition validator.
//!
//! Proves that a cell set (root cell plus inmates) is internally consistent
//! and that no two cells claim the same CPU, memory, interrupt pin, PCI
//! function, port range or stream ID.
//!
//! # Steps
//!
//! 0. Structural check of every descriptor, then unique names
//! 1. CPU disjointness (and coverage, if the platform requires it)
//! 2. Physical memory disjointness with the root-shared exception
//! 3. Comm region windows match the root's reserved window
//! 4. Interrupt pin disjointness
//! 5. PCI locator uniqueness and shared-memory group consistency
//! 6. Port ranges, stream IDs and architecture
//!
//! Step 0 runs first. Steps 1-6 are independent and run in parallel on
//! scoped threads; every scan finishes before a result is reported, and the
//! error of the lowest-numbered failing step wins.
//!
//! Validation is pure: the same input always yields the same result.

mod pin_arena;
mod scans;

#[cfg(test)]
mod validator_test;

pub use pin_arena::{PinArena, pin_location};

use crate::config::PlatformConfig;
use crate::cpu::CpuResolver;
use crate::descriptor::CellDescriptor;
use crate::error::{ConflictError, ValidationError};
use cellhv_abi::CellId;
use scans::{SCANS, ScanContext};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info_span, warn};

// =============================================================================
// Cell Set
// =============================================================================

/// Position of a cell in its cell set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellRole {
    /// The cell the set is built around. Owns everything not granted away.
    Root,
    /// Any other cell.
    Inmate,
}

/// A descriptor together with the ID it has in a cell set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellEntry {
    id: CellId,
    descriptor: Arc<CellDescriptor>,
}

impl CellEntry {
    /// Creates an entry.
    #[must_use]
    pub const fn new(id: CellId, descriptor: Arc<CellDescriptor>) -> Self {
        Self { id, descriptor }
    }

    /// Returns the cell ID.
    #[must_use]
    pub const fn id(&self) -> CellId {
        self.id
    }

    /// Returns the cell's role, derived from its ID.
    #[must_use]
    pub const fn role(&self) -> CellRole {
        if self.id.is_root() {
            CellRole::Root
        } else {
            CellRole::Inmate
        }
    }

    /// Returns the cell name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Returns the descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &CellDescriptor {
        &self.descriptor
    }

    /// Returns a shared handle to the descriptor.
    #[must_use]
    pub fn shared(&self) -> Arc<CellDescriptor> {
        Arc::clone(&self.descriptor)
    }
}

/// An immutable cell set that passed validation.
///
/// Only [`Validator`] can create one. The first entry is always the root
/// cell. Changes are made by building a new candidate and validating it;
/// the snapshot itself is never edited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedCellSet {
    version: u64,
    cells: Vec<CellEntry>,
}

impl ValidatedCellSet {
    /// Returns the snapshot version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the root cell.
    #[must_use]
    pub fn root(&self) -> &CellEntry {
        &self.cells[0]
    }

    /// Returns the inmates in cell-set order.
    #[must_use]
    pub fn inmates(&self) -> &[CellEntry] {
        &self.cells[1..]
    }

    /// Returns all cells, root first.
    #[must_use]
    pub fn cells(&self) -> &[CellEntry] {
        &self.cells
    }

    /// Returns the number of cells including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always `false`: a validated set contains at least the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Looks up a cell by ID.
    #[must_use]
    pub fn get(&self, id: CellId) -> Option<&CellEntry> {
        self.cells.iter().find(|entry| entry.id == id)
    }

    /// Looks up a cell by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&CellEntry> {
        self.cells.iter().find(|entry| entry.name() == name)
    }

    /// Returns the ID of the entry whose name and content equal `desc`.
    #[must_use]
    pub fn position_of(&self, desc: &CellDescriptor) -> Option<CellId> {
        self.find(&desc.name)
            .filter(|entry| entry.descriptor() == desc)
            .map(CellEntry::id)
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Validates cell sets against one platform.
#[derive(Clone, Copy, Debug)]
pub struct Validator<'a> {
    platform: &'a PlatformConfig,
    resolver: &'a CpuResolver,
}

impl<'a> Validator<'a> {
    /// Creates a validator.
    #[must_use]
    pub const fn new(platform: &'a PlatformConfig, resolver: &'a CpuResolver) -> Self {
        Self { platform, resolver }
    }

    /// Validates a candidate cell set.
    ///
    /// `root` becomes cell [`CellId::ROOT`]; `inmates` keep the IDs they
    /// carry. The resulting snapshot is tagged with `version`.
    ///
    /// # Errors
    ///
    /// Returns the first failure in step order. The candidate is rejected
    /// as a whole.
    pub fn validate(
        &self,
        version: u64,
        root: Arc<CellDescriptor>,
        inmates: impl IntoIterator<Item = CellEntry>,
    ) -> Result<ValidatedCellSet, ValidationError> {
        let mut cells = vec![CellEntry::new(CellId::ROOT, root)];
        cells.extend(inmates);

        let _span = info_span!("validate", version, cells = cells.len()).entered();
        match self.run(&cells) {
            Ok(()) => {
                debug!("cell set valid");
                Ok(ValidatedCellSet { version, cells })
            }
            Err(err) => {
                warn!(error = %err, "cell set rejected");
                Err(err)
            }
        }
    }

    /// Re-runs validation on an existing snapshot.
    ///
    /// # Errors
    ///
    /// Only if the platform or resolver changed since the snapshot was made.
    pub fn revalidate(&self, set: &ValidatedCellSet) -> Result<ValidatedCellSet, ValidationError> {
        self.validate(
            set.version,
            set.root().shared(),
            set.inmates().iter().cloned(),
        )
    }

    fn run(&self, cells: &[CellEntry]) -> Result<(), ValidationError> {
        for entry in cells {
            entry.descriptor().check(self.platform, self.resolver)?;
        }
        let mut names = HashSet::new();
        for entry in cells {
            if !names.insert(entry.name()) {
                return Err(ConflictError::DuplicateCellName {
                    name: entry.name().to_owned(),
                }
                .into());
            }
        }

        let ctx = ScanContext {
            platform: self.platform,
            resolver: self.resolver,
            cells,
        };
        let results = run_scans(&ctx);
        for ((name, _), result) in SCANS.iter().zip(results) {
            result.inspect_err(|err| debug!(scan = name, error = %err, "scan failed"))?;
        }
        Ok(())
    }
}

/// Runs every scan to completion and returns the results in step order.
fn run_scans(ctx: &ScanContext<'_>) -> Vec<Result<(), ConflictError>> {
    thread::scope(|scope| {
        let pending: Vec<_> = SCANS
            .iter()
            .map(|&(name, scan)| {
                thread::Builder::new()
                    .name(format!("validate-{name}"))
                    .spawn_scoped(scope, move || scan(ctx))
                    // Fall back to the calling thread if no thread is available
                    .map_err(|_| scan(ctx))
            })
            .collect();
        pending
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
                Err(inline) => inline,
            })
            .collect()
    })
}

/// Validates `root` and `inmates` as a fresh cell set.
///
/// Inmates are numbered from 1 in the given order; the snapshot is
/// version 1.
///
/// # Errors
///
/// See [`Validator::validate`].
pub fn validate(
    platform: &PlatformConfig,
    resolver: &CpuResolver,
    root: CellDescriptor,
    inmates: impl IntoIterator<Item = CellDescriptor>,
) -> Result<ValidatedCellSet, ValidationError> {
    let inmates = inmates
        .into_iter()
        .zip(1u32..)
        .map(|(desc, id)| CellEntry::new(CellId::new(id), Arc::new(desc)));
    Validator::new(platform, resolver).validate(1, Arc::new(root), inmates)
}
