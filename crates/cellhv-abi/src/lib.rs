// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shared ABI definitions for the cellhv partitioning core.
//!
//! This crate defines everything that has to stay bit-compatible with
//! descriptor images that are already deployed:
//! - Identifier newtypes for cells, logical CPUs, physical CPUs and PCI BDFs
//! - Flag sets for cells, memory regions and consoles
//! - Layout constants (page size, comm region window, irqchip geometry)
//! - The packed cell descriptor record and its encoder/decoder
//!
//! # Design Principles
//!
//! - **Explicit layout**: records are serialized field by field in
//!   little-endian order, never by reinterpreting native structs
//! - **Fail closed**: unknown revisions, tags or trailing data are rejected
//! - **`no_std` + `alloc`**: usable from the hypervisor image and the host
//!
//! # Modules
//!
//! - [`types`]: `CellId`, `CpuIndex`, `PhysCpuId`, `Bdf`, `Architecture`
//! - [`flags`]: `CellFlags`, `MemoryFlags`, `ConsoleFlags`
//! - [`layout`]: platform ABI constants
//! - [`format`]: descriptor records and the binary codec

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod flags;
pub mod format;
pub mod layout;
pub mod types;

// Re-export commonly used types at crate root
pub use flags::{CellFlags, ConsoleFlags, MemoryFlags};
pub use format::{
    Console, ConsoleType, FormatError, IrqChip, MemoryRegion, PciDevice, PciType, PioRegion,
    RawCellDescriptor,
};
pub use types::{Architecture, Bdf, CellId, CpuIndex, PhysCpuId};
