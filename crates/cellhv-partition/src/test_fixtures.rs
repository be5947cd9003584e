// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Descriptor fixtures shared by the unit tests.
//!
//! Modeled on an eight-core arm64 server: the root cell keeps CPUs 0-5 and
//! a Linux inmate gets CPUs 6 and 7, linked to the root by a virtual
//! ethernet shared-memory device.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::config::PlatformConfig;
use crate::cpu::CpuResolver;
use crate::descriptor::{CellDescriptor, shmem_net_regions};
use cellhv_abi::layout::{IVSHMEM_BAR_MASK_MSIX, SHMEM_PROTO_VETH};
use cellhv_abi::{
    Architecture, Bdf, CellFlags, Console, ConsoleFlags, ConsoleType, IrqChip, MemoryFlags,
    MemoryRegion, PciDevice, PhysCpuId,
};

pub const GIC: u64 = 0xe111_0000;
pub const UART: u64 = 0xe101_0000;
pub const NET_BASE: u64 = 0x83_e400_0000;

pub fn platform() -> PlatformConfig {
    PlatformConfig::default()
}

pub fn resolver() -> CpuResolver {
    CpuResolver::from_discovered(
        [0x000, 0x001, 0x100, 0x101, 0x200, 0x201, 0x300, 0x301].map(PhysCpuId::new),
    )
    .unwrap()
}

fn rw() -> MemoryFlags {
    MemoryFlags::READ | MemoryFlags::WRITE
}

fn uart() -> MemoryRegion {
    MemoryRegion::identity(UART, 0x1_0000, rw() | MemoryFlags::IO | MemoryFlags::ROOTSHARED)
}

fn veth(dev_id: u8, regions_start: u32) -> PciDevice {
    let mut dev = PciDevice::ivshmem(
        Bdf::new(0, 0x0f, 0).unwrap(),
        regions_start,
        dev_id,
        2,
        SHMEM_PROTO_VETH,
    );
    dev.bar_mask = IVSHMEM_BAR_MASK_MSIX;
    dev.num_msix_vectors = 2;
    dev
}

pub fn root() -> CellDescriptor {
    CellDescriptor::new("amd-seattle", Architecture::Arm64)
        .with_cpus(0..6)
        .with_region(MemoryRegion::identity(
            0x80_0000_0000,
            0x3_0000_0000,
            rw() | MemoryFlags::EXECUTE | MemoryFlags::DMA,
        ))
        .with_region(uart())
        .with_regions(shmem_net_regions(NET_BASE, 0))
        .with_irqchip(IrqChip::new(GIC, 32).with_pin(33).with_pin(34))
        .with_irqchip(IrqChip::new(GIC, 352).with_pin(353))
        .with_pci_device(veth(0, 2))
        .with_console(Console::new(
            UART,
            ConsoleType::Pl011,
            ConsoleFlags::ACCESS_MMIO | ConsoleFlags::REGDIST_4,
        ))
}

pub fn linux_inmate() -> CellDescriptor {
    CellDescriptor::new("linux-inmate-demo", Architecture::Arm64)
        .with_flags(CellFlags::PASSIVE_COMMREG)
        .with_cpus([6, 7])
        .with_regions(shmem_net_regions(NET_BASE, 1))
        .with_region(uart())
        .with_region(MemoryRegion::new(
            0x83_dfff_0000,
            0,
            0x1_0000,
            rw() | MemoryFlags::EXECUTE | MemoryFlags::DMA | MemoryFlags::LOADABLE,
        ))
        .with_comm_region(platform().comm_region)
        .with_irqchip(IrqChip::new(GIC, 32).with_pin(100))
        .with_irqchip(
            IrqChip::new(GIC, 352)
                .with_pin(354)
                .with_pin(360)
                .with_pin(376),
        )
        .with_pci_device(veth(1, 0))
        .with_console(Console::new(
            UART,
            ConsoleType::Pl011,
            ConsoleFlags::ACCESS_MMIO | ConsoleFlags::REGDIST_4,
        ))
}

/// A minimal inmate owning one CPU and one private RAM page range.
pub fn tiny_inmate(name: &str, cpu: u32, ram: u64) -> CellDescriptor {
    CellDescriptor::new(name, Architecture::Arm64)
        .with_cpus([cpu])
        .with_region(MemoryRegion::identity(ram, 0x1_0000, rw()))
        .with_comm_region(platform().comm_region)
}
