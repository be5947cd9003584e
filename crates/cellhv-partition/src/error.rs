// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Error taxonomy of the partition core.
//!
//! Every error names the cells, regions, pins or devices involved. Nothing
//! here is ever auto-corrected: a guessed fix would silently weaken the
//! isolation the caller asked for.

use crate::config::CommWindow;
use crate::lifecycle::CellState;
use cellhv_abi::{Architecture, Bdf, CellId, CpuIndex, FormatError, PhysCpuId};
use std::fmt;
use thiserror::Error;

/// Misuse of the CPU identity resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    /// No logical index was registered for this hardware ID.
    #[error("unknown processor {0}")]
    UnknownProcessor(PhysCpuId),
    /// The logical index is outside the registered range.
    #[error("logical CPU index {index} out of range ({count} CPUs registered)")]
    InvalidIndex {
        /// The rejected index.
        index: CpuIndex,
        /// Number of registered CPUs.
        count: usize,
    },
    /// The same hardware ID was discovered twice.
    #[error("processor {0} discovered twice")]
    DuplicateProcessor(PhysCpuId),
    /// Discovery produced no processors.
    #[error("no processors discovered")]
    NoProcessors,
}

/// A descriptor failed its structural checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed descriptor `{cell}`: {field}: {reason}")]
pub struct MalformedDescriptor {
    /// Name of the offending cell.
    pub cell: String,
    /// Offending field, e.g. `memory_regions[3].size`.
    pub field: String,
    /// What is wrong with it.
    pub reason: String,
}

impl MalformedDescriptor {
    pub(crate) fn new(cell: &str, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            cell: cell.to_owned(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A memory region, named by its owning cell and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRef {
    /// Owning cell.
    pub cell: String,
    /// Index in the cell's `memory_regions`.
    pub index: usize,
    /// Physical start of the region.
    pub phys_start: u64,
    /// Size of the region.
    pub size: u64,
}

impl fmt::Display for RegionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.memory_regions[{}] [{:#x}, {:#x})",
            self.cell,
            self.index,
            self.phys_start,
            self.phys_start.saturating_add(self.size)
        )
    }
}

/// Two or more cells claim the same resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// A logical CPU appears in two CPU sets.
    #[error("{cpu} claimed by {cells:?}")]
    CpuConflict {
        /// The contested CPU.
        cpu: CpuIndex,
        /// Cells claiming it, in cell-set order.
        cells: Vec<String>,
    },
    /// A present CPU is owned by no cell on a full-coverage platform.
    #[error("{cpu} is not assigned to any cell")]
    CpuUnassigned {
        /// The orphaned CPU.
        cpu: CpuIndex,
    },
    /// Two physical ranges overlap without sanctioned sharing.
    #[error("memory overlap between {region_a} and {region_b}")]
    MemoryOverlap {
        /// The region that comes first in address order.
        region_a: RegionRef,
        /// The region it collides with.
        region_b: RegionRef,
    },
    /// An inmate's comm region does not match the root's reserved window.
    #[error("comm region of `{cell}` is {found}, expected {expected}")]
    CommRegionMismatch {
        /// The inmate.
        cell: String,
        /// The root's reserved window.
        expected: CommWindow,
        /// What the inmate declares.
        found: CommWindow,
    },
    /// An interrupt pin is granted to two cells.
    #[error("irq pin {pin} of chip {chip:#x} claimed by {cells:?}")]
    IrqConflict {
        /// The contested pin.
        pin: u32,
        /// Address of the interrupt controller.
        chip: u64,
        /// Cells claiming it.
        cells: Vec<String>,
    },
    /// A non-shared PCI function is assigned twice.
    #[error("PCI device {domain:04x}:{bdf} assigned to {cells:?}")]
    PciBdfConflict {
        /// The contested locator.
        bdf: Bdf,
        /// PCI segment.
        domain: u16,
        /// Cells claiming it.
        cells: Vec<String>,
    },
    /// The peers of a shared-memory link disagree.
    #[error("shared-memory group at {group:#x}: {reason}")]
    ShmemPeerMismatch {
        /// Physical address of the group's first region.
        group: u64,
        /// What is inconsistent.
        reason: String,
    },
    /// An x86 port range is granted to two cells.
    #[error("port range starting at {base:#x} claimed by {cells:?}")]
    PioConflict {
        /// First port of the later range.
        base: u16,
        /// Cells claiming it.
        cells: Vec<String>,
    },
    /// An SMMU stream ID is granted to two cells.
    #[error("stream id {stream_id:#x} claimed by {cells:?}")]
    StreamIdConflict {
        /// The contested stream ID.
        stream_id: u32,
        /// Cells claiming it.
        cells: Vec<String>,
    },
    /// Two cells share a name.
    #[error("cell name `{name}` used twice")]
    DuplicateCellName {
        /// The duplicated name.
        name: String,
    },
    /// An inmate targets a different architecture than the root cell.
    #[error("cell `{cell}` targets {found}, root cell targets {expected}")]
    ArchitectureMismatch {
        /// The inmate.
        cell: String,
        /// Root cell architecture.
        expected: Architecture,
        /// Inmate architecture.
        found: Architecture,
    },
}

/// Rejection of a whole pending cell-set change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// One descriptor is structurally broken.
    #[error(transparent)]
    Malformed(#[from] MalformedDescriptor),
    /// Descriptors conflict with each other.
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    /// A descriptor refers to CPUs the resolver does not know.
    #[error(transparent)]
    Resolver(#[from] ResolverError),
}

/// Failure of an enforcement collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnforcementError {
    /// The collaborator refused the request.
    #[error("{0}")]
    Rejected(String),
    /// The collaborator did not answer within the configured timeout.
    #[error("no response within {0:?}")]
    TimedOut(std::time::Duration),
    /// The collaborator's worker went away without answering.
    #[error("collaborator worker terminated")]
    Disconnected,
}

/// Failure of a cell lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The descriptor is not part of the current validated snapshot.
    #[error("descriptor `{name}` is not part of the validated cell set")]
    NotValidated {
        /// Name of the rejected descriptor.
        name: String,
    },
    /// Hardware programming failed; the cell was rolled back.
    #[error("enforcement failed for `{cell}`: {reason}")]
    EnforcementFailed {
        /// Affected cell.
        cell: String,
        /// Collaborator's reason.
        reason: String,
    },
    /// Hardware programming failed and so did releasing it again. The cell
    /// may still be partially programmed; stop it before retrying.
    #[error("enforcement failed for `{cell}`: {reason}; rollback failed: {rollback}")]
    RollbackFailed {
        /// Affected cell.
        cell: String,
        /// Collaborator's reason for the original failure.
        reason: String,
        /// Collaborator's reason for the failed release.
        rollback: String,
    },
    /// An earlier collaborator call for the cell has not returned yet.
    #[error("`{operation}` for `{cell}` is still in flight")]
    CallInFlight {
        /// Affected cell.
        cell: String,
        /// Operation still running.
        operation: &'static str,
    },
    /// The operation is not allowed in the cell's current state.
    #[error("cannot {operation} `{cell}` while {state}")]
    InvalidState {
        /// Affected cell.
        cell: String,
        /// Current state.
        state: CellState,
        /// Attempted operation.
        operation: &'static str,
    },
    /// No cell with this ID exists.
    #[error("unknown cell {0}")]
    UnknownCell(CellId),
    /// The root cell cannot be stopped, destroyed or removed.
    #[error("the root cell cannot be stopped or removed")]
    RootCellImmutable,
    /// No root cell has been enabled yet.
    #[error("partitioning is not enabled")]
    NotEnabled,
    /// A root cell is already enabled.
    #[error("partitioning is already enabled")]
    AlreadyEnabled,
    /// The candidate cell set was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failure while reading descriptors from their source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source could not be read at all.
    #[error("descriptor source unavailable: {reason}")]
    SourceUnavailable {
        /// Underlying cause.
        reason: String,
    },
    /// The source holds no descriptors.
    #[error("descriptor source is empty")]
    Empty,
    /// An image is not a valid descriptor record.
    #[error("descriptor image {index}: {source}")]
    Format {
        /// Position of the image in the source.
        index: usize,
        /// Decoder error.
        source: FormatError,
    },
    /// An image names unknown CPUs or fails its structural checks.
    #[error("descriptor image {index}: {source}")]
    Rejected {
        /// Position of the image in the source.
        index: usize,
        /// Why the image was rejected.
        source: ValidationError,
    },
}
