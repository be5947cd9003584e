// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Core type definitions for cell, CPU and PCI identifiers.
//!
//! These newtypes prevent accidentally mixing a logical CPU index with a
//! hardware processor id, or a raw `u16` with a PCI locator.

mod arch;
mod bdf;
mod id;


pub use arch::Architecture;
pub use bdf::Bdf;
pub use id::{CellId, CpuIndex, PhysCpuId};
