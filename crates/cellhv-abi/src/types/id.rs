// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! ID types for cells and processors.

use core::fmt;

/// Identifier of a cell within the active cell set.
///
/// Cell IDs are assigned by the partition manager when a cell joins the
/// cell set. The root cell always has ID 0; inmates count up from 1 and IDs
/// are never reused while the manager is alive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct CellId(u32);

impl CellId {
    /// The root cell ID.
    pub const ROOT: Self = Self(0);

    /// Creates a new cell ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is the root cell ID.
    #[inline]
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }

    /// Returns the ID following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({})", self.0)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell:{}", self.0)
    }
}

/// Dense, zero-based logical CPU index.
///
/// Logical indices are handed out in discovery order by the CPU resolver.
/// Every component that builds CPU bitmaps or checks ownership works in this
/// space; hardware identifiers never leak past the resolver.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct CpuIndex(u32);

impl CpuIndex {
    /// Creates a new logical CPU index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the index as usize (for array indexing).
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for CpuIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuIndex({})", self.0)
    }
}

impl fmt::Display for CpuIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Hardware-reported processor identifier.
///
/// The encoding is platform specific: an MPIDR affinity value on ARM, an
/// APIC ID on x86. Identifiers are neither dense nor contiguous (e.g.
/// `0x0300` and `0x0301` on a two-core cluster).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysCpuId(u64);

impl PhysCpuId {
    /// Creates a new physical processor ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the MPIDR affinity fields `[aff0, aff1, aff2, aff3]`.
    ///
    /// Only meaningful on ARM platforms; on x86 `aff0` is the low byte of
    /// the APIC ID.
    #[inline]
    #[must_use]
    pub const fn affinity(self) -> [u8; 4] {
        [
            (self.0 & 0xff) as u8,
            ((self.0 >> 8) & 0xff) as u8,
            ((self.0 >> 16) & 0xff) as u8,
            ((self.0 >> 32) & 0xff) as u8,
        ]
    }
}

impl fmt::Debug for PhysCpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysCpuId({:#x})", self.0)
    }
}

impl fmt::Display for PhysCpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
