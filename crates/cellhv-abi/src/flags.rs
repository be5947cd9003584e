// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Flag sets carried in cell descriptor records.
//!
//! Bit values are part of the persisted format and must never change.

use bitflags::bitflags;

bitflags! {
    /// Cell-wide flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CellFlags: u32 {
        /// The cell does not actively poll or take IRQs for its comm region.
        const PASSIVE_COMMREG = 0x0000_0001;
        /// The cell may use the hypervisor test device.
        const TEST_DEVICE = 0x0000_0002;
        /// The cell may write to the hypervisor debug console.
        const VIRTUAL_CONSOLE_PERMITTED = 0x4000_0000;
        /// The hypervisor debug console is the cell's active console.
        const VIRTUAL_CONSOLE_ACTIVE = 0x8000_0000;
    }
}

bitflags! {
    /// Access and placement flags of a memory region.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MemoryFlags: u64 {
        /// Readable by the cell.
        const READ = 0x0001;
        /// Writable by the cell.
        const WRITE = 0x0002;
        /// Executable by the cell.
        const EXECUTE = 0x0004;
        /// Accessible by devices assigned to the cell.
        const DMA = 0x0008;
        /// MMIO rather than RAM.
        const IO = 0x0010;
        /// Reserved for hypervisor communication.
        const COMM_REGION = 0x0020;
        /// An image may be copied here before the cell starts.
        const LOADABLE = 0x0040;
        /// Also mapped into the root cell.
        const ROOTSHARED = 0x0080;
        /// Stage-2 mappings must use base pages only.
        const NO_HUGEPAGES = 0x0100;
    }
}

bitflags! {
    /// Console access flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ConsoleFlags: u16 {
        /// Registers are memory mapped (port I/O when clear).
        const ACCESS_MMIO = 0x0001;
        /// Registers are 4 bytes apart (1 byte when clear).
        const REGDIST_4 = 0x0002;
        /// The clock gate bit is active low.
        const INVERTED_GATE = 0x0004;
        /// Apply the MDR quirk on OMAP-style UARTs.
        const MDR_QUIRK = 0x0008;
    }
}

impl MemoryFlags {
    /// Access flags a comm region must carry.
    pub const COMM_REGION_ACCESS: Self = Self::READ.union(Self::WRITE);

    /// Flags a comm region must never carry.
    pub const COMM_REGION_FORBIDDEN: Self = Self::IO
        .union(Self::DMA)
        .union(Self::EXECUTE)
        .union(Self::LOADABLE)
        .union(Self::ROOTSHARED);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn memory_flag_values_are_stable() {
        assert_eq!(MemoryFlags::COMM_REGION.bits(), 0x20);
        assert_eq!(MemoryFlags::ROOTSHARED.bits(), 0x80);
        assert_eq!(
            (MemoryFlags::READ | MemoryFlags::WRITE | MemoryFlags::IO).bits(),
            0x13
        );
    }

    #[test]
    fn comm_region_masks_are_disjoint() {
        assert!(
            MemoryFlags::COMM_REGION_ACCESS
                .intersection(MemoryFlags::COMM_REGION_FORBIDDEN)
                .is_empty()
        );
    }

    #[test]
    fn unknown_bits_are_retained() {
        // Flags from newer images must survive a decode/encode cycle
        let flags = MemoryFlags::from_bits_retain(0x8000 | 0x1);
        assert!(flags.contains(MemoryFlags::READ));
        assert_eq!(flags.bits(), 0x8001);
    }
}
