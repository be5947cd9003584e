// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shared test infrastructure for integration tests.
//!
//! This module provides two reference boards:
//! - an eight-core arm64 server with a Linux inmate linked to the root cell
//!   by a virtual ethernet shared-memory device
//! - a four-core arm board with a single-CPU bare-metal demo inmate
//!
//! # Design
//!
//! This module is **not** a test file, so it must comply with full clippy rules.
//! Fallible constructors return `Result` and the test files unwrap them.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use cellhv_abi::layout::{IVSHMEM_BAR_MASK_MSIX, SHMEM_PROTO_VETH};
use cellhv_abi::{
    Architecture, Bdf, CellFlags, Console, ConsoleFlags, ConsoleType, IrqChip, MemoryFlags,
    MemoryRegion, PciDevice, PhysCpuId,
};
use cellhv_partition::{
    CellDescriptor, CommWindow, CpuResolver, PartitionManager, PlatformConfig,
    RecordingEnforcement, ResolverError, shmem_net_regions,
};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber once per test binary.
///
/// Filter with `RUST_LOG`, e.g. `RUST_LOG=cellhv_partition=debug`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn rw() -> MemoryFlags {
    MemoryFlags::READ | MemoryFlags::WRITE
}

/// Creates a manager backed by a fresh recording backend.
pub fn manager(
    platform: PlatformConfig,
    resolver: CpuResolver,
) -> (PartitionManager, Arc<RecordingEnforcement>) {
    let recording = Arc::new(RecordingEnforcement::new());
    let manager = PartitionManager::new(platform, Arc::new(resolver), recording.clone());
    (manager, recording)
}

// =============================================================================
// arm64 Server
// =============================================================================

pub const SEATTLE_GIC: u64 = 0xe111_0000;
pub const SEATTLE_UART: u64 = 0xe101_0000;
pub const SEATTLE_NET: u64 = 0x83_e400_0000;
pub const SEATTLE_INMATE_RAM: u64 = 0x83_dfff_0000;

/// Two clusters of four, affinity `0x000..=0x301`.
pub fn seattle_resolver() -> Result<CpuResolver, ResolverError> {
    CpuResolver::from_discovered(
        [0x000, 0x001, 0x100, 0x101, 0x200, 0x201, 0x300, 0x301].map(PhysCpuId::new),
    )
}

fn seattle_uart() -> MemoryRegion {
    MemoryRegion::identity(
        SEATTLE_UART,
        0x1000,
        rw() | MemoryFlags::IO | MemoryFlags::ROOTSHARED,
    )
}

fn seattle_console() -> Console {
    Console::new(
        SEATTLE_UART,
        ConsoleType::Pl011,
        ConsoleFlags::ACCESS_MMIO | ConsoleFlags::REGDIST_4,
    )
}

fn veth(dev_id: u8, regions_start: u32) -> PciDevice {
    let mut dev = PciDevice::ivshmem(Bdf::from_raw(0x0f << 3), regions_start, dev_id, 2, SHMEM_PROTO_VETH);
    dev.bar_mask = IVSHMEM_BAR_MASK_MSIX;
    dev.num_msix_vectors = 2;
    dev
}

/// Root cell: CPUs 0-5, all RAM below the inmate, the shared UART and
/// peer 0 of the virtual ethernet link.
pub fn seattle_root() -> CellDescriptor {
    CellDescriptor::new("amd-seattle", Architecture::Arm64)
        .with_cpus(0..6)
        .with_region(MemoryRegion::identity(
            0x80_0000_0000,
            0x3_dfff_0000,
            rw() | MemoryFlags::EXECUTE | MemoryFlags::DMA,
        ))
        .with_region(seattle_uart())
        .with_regions(shmem_net_regions(SEATTLE_NET, 0))
        .with_irqchip(IrqChip::new(SEATTLE_GIC, 32).with_pin(33).with_pin(34))
        .with_irqchip(IrqChip::new(SEATTLE_GIC, 352).with_pin(353))
        .with_pci_device(veth(0, 2))
        .with_console(seattle_console())
}

/// Linux inmate: CPUs 6 and 7, 64K of loadable RAM at virtual 0 and peer 1
/// of the virtual ethernet link.
pub fn seattle_linux_demo() -> CellDescriptor {
    CellDescriptor::new("amd-seattle-linux-demo", Architecture::Arm64)
        .with_flags(CellFlags::PASSIVE_COMMREG)
        .with_cpus([6, 7])
        .with_regions(shmem_net_regions(SEATTLE_NET, 1))
        .with_region(seattle_uart())
        .with_region(MemoryRegion::new(
            SEATTLE_INMATE_RAM,
            0,
            0x1_0000,
            rw() | MemoryFlags::EXECUTE | MemoryFlags::DMA | MemoryFlags::LOADABLE,
        ))
        .with_comm_region(CommWindow::default())
        .with_irqchip(IrqChip::new(SEATTLE_GIC, 32).with_pin(100))
        .with_irqchip(IrqChip::new(SEATTLE_GIC, 352).with_pin(354).with_pin(360))
        .with_pci_device(veth(1, 0))
        .with_console(seattle_console())
}

/// Minimal inmate with one CPU and 64K of private RAM.
pub fn seattle_tiny(name: &str, cpu: u32, ram: u64) -> CellDescriptor {
    CellDescriptor::new(name, Architecture::Arm64)
        .with_cpus([cpu])
        .with_region(MemoryRegion::identity(ram, 0x1_0000, rw()))
        .with_comm_region(CommWindow::default())
}

// =============================================================================
// arm Board
// =============================================================================

pub const RZG1H_SCIFA0: u64 = 0xe6c4_0000;
pub const RZG1H_INMATE_RAM: u64 = 0x7bff_0000;

/// Four cores, MPIDR `0..=3`.
pub fn rzg1h_resolver() -> Result<CpuResolver, ResolverError> {
    CpuResolver::from_discovered((0..4).map(PhysCpuId::new))
}

/// Root cell: every CPU but 1 and all RAM below the inmate.
pub fn rzg1h_root() -> CellDescriptor {
    CellDescriptor::new("emtrion-emconrzg1h", Architecture::Arm)
        .with_cpus([0, 2, 3])
        .with_region(MemoryRegion::identity(
            0x4000_0000,
            RZG1H_INMATE_RAM - 0x4000_0000,
            rw() | MemoryFlags::EXECUTE,
        ))
}

/// Bare-metal demo: CPU 1, SCIFA0 and 64K of RAM.
pub fn rzg1h_inmate_demo() -> CellDescriptor {
    let mut console = Console::new(
        RZG1H_SCIFA0,
        ConsoleType::Scifa,
        ConsoleFlags::ACCESS_MMIO | ConsoleFlags::REGDIST_4,
    );
    console.clock_reg = 0xe615_0138;
    console.gate_nr = 4;
    console.divider = 0x1b;

    CellDescriptor::new("emtrion-emconrzg1h-inmate-demo", Architecture::Arm)
        .with_flags(CellFlags::PASSIVE_COMMREG)
        .with_cpus([1])
        .with_region(MemoryRegion::identity(RZG1H_SCIFA0, 0x1000, rw() | MemoryFlags::IO))
        .with_region(MemoryRegion::new(
            RZG1H_INMATE_RAM,
            0,
            0x1_0000,
            rw() | MemoryFlags::EXECUTE | MemoryFlags::LOADABLE,
        ))
        .with_comm_region(CommWindow::default())
        .with_console(console)
}
