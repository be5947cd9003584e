// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # cellhv partition core
//!
//! Static resource partitioning for a cell-based hypervisor. A machine is
//! split into a root cell and any number of inmate cells, each owning a
//! disjoint share of CPUs, physical memory, interrupt pins and devices.
//!
//! ## Architecture
//!
//! ```text
//! DescriptorSource ──> CellDescriptor ──> Validator ──> ValidatedCellSet
//!                           ^                                 │
//!                      CpuResolver                            v
//!                                            PartitionManager ──> Enforcement
//! ```
//!
//! - [`cpu`]: maps physical processor IDs to dense logical indices
//! - [`descriptor`]: per-cell resource descriptors and their structural check
//! - [`validator`]: cross-cell disjointness proof, producing immutable
//!   snapshots
//! - [`lifecycle`]: serialized cell state machine on top of a snapshot
//! - [`enforcement`]: the hardware programming seam
//! - [`source`]: reading descriptor images
//!
//! Nothing is ever auto-corrected: a candidate cell set is either accepted
//! as a whole or rejected with the first conflict found.


#[cfg(test)]
mod test_fixtures;

pub mod config;
pub mod cpu;
pub mod descriptor;
pub mod enforcement;
pub mod error;
pub mod lifecycle;
pub mod source;
pub mod validator;

pub use config::{CommWindow, PlatformConfig};
pub use cpu::{CpuResolver, CpuSet};
pub use descriptor::{ArchExtension, CellDescriptor, IrqRouting, shmem_net_regions};
pub use enforcement::{Enforcement, RecordingEnforcement};
pub use error::{
    ConflictError, EnforcementError, LifecycleError, MalformedDescriptor, ResolverError,
    SourceError, ValidationError,
};
pub use lifecycle::{CellState, CellSummary, PartitionManager};
pub use source::{DescriptorSource, DirectorySource, LoadedCells, MemorySource, load_cell_set};
pub use validator::{CellEntry, CellRole, ValidatedCellSet, Validator, validate};

/// Crate version for runtime queries.
///
/// Uses the build-provided `CELLHV_VERSION` environment variable when
/// available, falling back to the package version otherwise.
pub const VERSION: &str = match option_env!("CELLHV_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
