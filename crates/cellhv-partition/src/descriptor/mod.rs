// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Resolved cell descriptors.
//!
//! [`CellDescriptor`] is the in-memory model every other component works on.
//! It differs from the persisted [`RawCellDescriptor`] in two ways:
//!
//! - CPUs are a [`CpuSet`] of logical indices, not hardware IDs
//! - Architecture-specific arrays live in an [`ArchExtension`] variant, so an
//!   arm64 cell simply has no port I/O field
//!
//! Descriptors are plain data. The only behavior is the structural
//! [`check`](CellDescriptor::check), which looks at one cell in isolation.

mod check;


use crate::config::{CommWindow, PlatformConfig};
use crate::cpu::{CpuResolver, CpuSet};
use crate::error::{MalformedDescriptor, ResolverError, ValidationError};
use cellhv_abi::layout::{SHMEM_NET_OUTPUT_SIZE, SHMEM_STATE_TABLE_SIZE, shmem_net_output_base};
use cellhv_abi::{
    Architecture, CellFlags, Console, CpuIndex, IrqChip, MemoryFlags, MemoryRegion, PciDevice,
    PioRegion, RawCellDescriptor,
};
use tracing::warn;

// =============================================================================
// Architecture Payload
// =============================================================================

/// Architecture tag plus the resources only that architecture has.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchExtension {
    /// x86: port I/O ranges.
    X86 {
        /// Granted port ranges.
        pio_regions: Vec<PioRegion>,
    },
    /// 32-bit ARM.
    Arm,
    /// 64-bit ARM: SMMU stream IDs.
    Arm64 {
        /// Granted stream IDs.
        stream_ids: Vec<u32>,
    },
}

impl ArchExtension {
    /// Creates an empty payload for `arch`.
    #[must_use]
    pub const fn empty(arch: Architecture) -> Self {
        match arch {
            Architecture::X86 => Self::X86 {
                pio_regions: Vec::new(),
            },
            Architecture::Arm => Self::Arm,
            Architecture::Arm64 => Self::Arm64 {
                stream_ids: Vec::new(),
            },
        }
    }

    /// Returns the architecture tag.
    #[must_use]
    pub const fn architecture(&self) -> Architecture {
        match self {
            Self::X86 { .. } => Architecture::X86,
            Self::Arm => Architecture::Arm,
            Self::Arm64 { .. } => Architecture::Arm64,
        }
    }
}

// =============================================================================
// Interrupt Routing
// =============================================================================

/// Interrupt pins granted to a cell, as a list of irqchip entries.
///
/// A pin is addressed by `(chip address, pin number)`. Several entries may
/// name the same chip with different `pin_base` values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IrqRouting {
    chips: Vec<IrqChip>,
}

impl IrqRouting {
    /// Creates an empty routing.
    #[must_use]
    pub const fn new() -> Self {
        Self { chips: Vec::new() }
    }

    /// Wraps existing irqchip entries.
    #[must_use]
    pub const fn from_chips(chips: Vec<IrqChip>) -> Self {
        Self { chips }
    }

    /// Appends an irqchip entry.
    pub fn push(&mut self, chip: IrqChip) {
        self.chips.push(chip);
    }

    /// Returns the irqchip entries.
    #[must_use]
    pub fn chips(&self) -> &[IrqChip] {
        &self.chips
    }

    /// Checks if any entry grants `pin` of the chip at `address`.
    #[must_use]
    pub fn owns(&self, address: u64, pin: u32) -> bool {
        self.chips
            .iter()
            .any(|chip| chip.address == address && chip.owns(pin))
    }

    /// Iterates all granted `(chip address, pin)` pairs.
    pub fn pins(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.chips
            .iter()
            .flat_map(|chip| chip.pins().map(move |pin| (chip.address, pin)))
    }

    /// Checks if no pin is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pins().next().is_none()
    }
}

// =============================================================================
// Cell Descriptor
// =============================================================================

/// A cell's complete resource grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellDescriptor {
    /// Unique cell name.
    pub name: String,
    /// Cell flags.
    pub flags: CellFlags,
    /// Architecture and its specific resources.
    pub arch: ArchExtension,
    /// Entry address for the cell's boot CPU.
    pub cpu_reset_address: u64,
    /// Logical CPUs owned exclusively by the cell.
    pub cpu_set: CpuSet,
    /// Memory regions, in placement order.
    pub memory_regions: Vec<MemoryRegion>,
    /// Interrupt pin grants.
    pub irq_routing: IrqRouting,
    /// PCI device assignments.
    pub pci_devices: Vec<PciDevice>,
    /// Optional console.
    pub console: Option<Console>,
}

impl CellDescriptor {
    /// Creates an empty descriptor.
    #[must_use]
    pub fn new(name: &str, arch: Architecture) -> Self {
        Self {
            name: name.to_owned(),
            flags: CellFlags::empty(),
            arch: ArchExtension::empty(arch),
            cpu_reset_address: 0,
            cpu_set: CpuSet::new(),
            memory_regions: Vec::new(),
            irq_routing: IrqRouting::new(),
            pci_devices: Vec::new(),
            console: None,
        }
    }

    /// Returns the target architecture.
    #[must_use]
    pub const fn architecture(&self) -> Architecture {
        self.arch.architecture()
    }

    /// Returns the comm region entry and its index, if any.
    #[must_use]
    pub fn comm_region(&self) -> Option<(usize, &MemoryRegion)> {
        self.memory_regions
            .iter()
            .enumerate()
            .find(|(_, region)| region.is_comm_region())
    }

    /// Returns the window of the cell's comm region, if it declares one.
    #[must_use]
    pub fn comm_window(&self) -> Option<CommWindow> {
        self.comm_region()
            .map(|(_, region)| CommWindow::new(region.virt_start, region.size))
    }

    /// Returns the physical address identifying a shared-memory device's
    /// region group: the start of the group's first region.
    #[must_use]
    pub fn shmem_group(&self, dev: &PciDevice) -> Option<u64> {
        if !dev.is_shmem() {
            return None;
        }
        self.memory_regions
            .get(dev.shmem_regions_start as usize)
            .map(|region| region.phys_start)
    }

    /// Returns the port ranges (empty unless x86).
    #[must_use]
    pub fn pio_regions(&self) -> &[PioRegion] {
        match &self.arch {
            ArchExtension::X86 { pio_regions } => pio_regions,
            _ => &[],
        }
    }

    /// Returns the stream IDs (empty unless arm64).
    #[must_use]
    pub fn stream_ids(&self) -> &[u32] {
        match &self.arch {
            ArchExtension::Arm64 { stream_ids } => stream_ids,
            _ => &[],
        }
    }

    /// Checks the descriptor in isolation.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedDescriptor`] naming the first offending field.
    pub fn check(
        &self,
        platform: &PlatformConfig,
        resolver: &CpuResolver,
    ) -> Result<(), MalformedDescriptor> {
        check::check(self, platform, resolver)
    }

    // =========================================================================
    // Persisted Form
    // =========================================================================

    /// Resolves a persisted record.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::Resolver`] if a CPU is unknown to `resolver`
    /// - [`ValidationError::Malformed`] if a CPU is listed twice
    pub fn from_raw(raw: RawCellDescriptor, resolver: &CpuResolver) -> Result<Self, ValidationError> {
        let mut cpu_set = CpuSet::new();
        for (i, phys) in raw.cpus.iter().enumerate() {
            if !cpu_set.insert(resolver.resolve(*phys)?) {
                return Err(MalformedDescriptor::new(
                    &raw.name,
                    format!("cpus[{i}]"),
                    format!("processor {phys} listed twice"),
                )
                .into());
            }
        }
        let arch = match raw.architecture {
            Architecture::X86 => ArchExtension::X86 {
                pio_regions: raw.pio_regions,
            },
            Architecture::Arm => ArchExtension::Arm,
            Architecture::Arm64 => ArchExtension::Arm64 {
                stream_ids: raw.stream_ids,
            },
        };
        Ok(Self {
            name: raw.name,
            flags: raw.flags,
            arch,
            cpu_reset_address: raw.cpu_reset_address,
            cpu_set,
            memory_regions: raw.memory_regions,
            irq_routing: IrqRouting::from_chips(raw.irqchips),
            pci_devices: raw.pci_devices,
            console: (raw.console != Console::NONE).then_some(raw.console),
        })
    }

    /// Produces the persisted record.
    ///
    /// # Errors
    ///
    /// [`ResolverError::InvalidIndex`] if the CPU set names an index the
    /// resolver does not know.
    pub fn to_raw(&self, resolver: &CpuResolver) -> Result<RawCellDescriptor, ResolverError> {
        let mut raw = RawCellDescriptor::new(&self.name, self.architecture());
        raw.flags = self.flags;
        raw.cpu_reset_address = self.cpu_reset_address;
        raw.cpus = self
            .cpu_set
            .iter()
            .map(|cpu| resolver.identity_of(cpu))
            .collect::<Result<_, _>>()?;
        raw.memory_regions.clone_from(&self.memory_regions);
        raw.irqchips = self.irq_routing.chips().to_vec();
        raw.pio_regions = self.pio_regions().to_vec();
        raw.pci_devices.clone_from(&self.pci_devices);
        raw.stream_ids = self.stream_ids().to_vec();
        raw.console = self.console.unwrap_or(Console::NONE);
        Ok(raw)
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// Sets the cell flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: CellFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the boot CPU entry address.
    #[must_use]
    pub const fn with_cpu_reset_address(mut self, address: u64) -> Self {
        self.cpu_reset_address = address;
        self
    }

    /// Adds logical CPUs.
    #[must_use]
    pub fn with_cpus(mut self, cpus: impl IntoIterator<Item = u32>) -> Self {
        self.cpu_set.extend(cpus.into_iter().map(CpuIndex::new));
        self
    }

    /// Appends a memory region.
    #[must_use]
    pub fn with_region(mut self, region: MemoryRegion) -> Self {
        self.memory_regions.push(region);
        self
    }

    /// Appends several memory regions.
    #[must_use]
    pub fn with_regions(mut self, regions: impl IntoIterator<Item = MemoryRegion>) -> Self {
        self.memory_regions.extend(regions);
        self
    }

    /// Appends the comm region at the given window.
    #[must_use]
    pub fn with_comm_region(self, window: CommWindow) -> Self {
        self.with_region(MemoryRegion::comm_region(window.virt_start, window.size))
    }

    /// Appends an irqchip entry.
    #[must_use]
    pub fn with_irqchip(mut self, chip: IrqChip) -> Self {
        self.irq_routing.push(chip);
        self
    }

    /// Appends a PCI device assignment.
    #[must_use]
    pub fn with_pci_device(mut self, dev: PciDevice) -> Self {
        self.pci_devices.push(dev);
        self
    }

    /// Sets the console.
    #[must_use]
    pub const fn with_console(mut self, console: Console) -> Self {
        self.console = Some(console);
        self
    }

    /// Appends a port range.
    ///
    /// Only x86 cells have port ranges. On any other cell the range is
    /// dropped with a warning; debug builds panic instead.
    #[must_use]
    pub fn with_pio_region(mut self, region: PioRegion) -> Self {
        debug_assert_eq!(
            self.architecture(),
            Architecture::X86,
            "port range on cell `{}`",
            self.name
        );
        if let ArchExtension::X86 { pio_regions } = &mut self.arch {
            pio_regions.push(region);
        } else {
            self.dropped_payload("port range");
        }
        self
    }

    /// Appends a stream ID.
    ///
    /// Only arm64 cells have stream IDs. On any other cell the ID is
    /// dropped with a warning; debug builds panic instead.
    #[must_use]
    pub fn with_stream_id(mut self, stream_id: u32) -> Self {
        debug_assert_eq!(
            self.architecture(),
            Architecture::Arm64,
            "stream ID on cell `{}`",
            self.name
        );
        if let ArchExtension::Arm64 { stream_ids } = &mut self.arch {
            stream_ids.push(stream_id);
        } else {
            self.dropped_payload("stream ID");
        }
        self
    }

    fn dropped_payload(&self, what: &str) {
        warn!(cell = %self.name, arch = %self.architecture(), "{what} ignored");
    }
}

/// Returns the four regions of a two-peer virtual ethernet link.
///
/// Layout at `base`: a read-only state table, an empty read/write
/// placeholder, then one output section per peer. Peer `dev_id` may write
/// only its own output section. Every region is shared with the root cell.
#[must_use]
pub fn shmem_net_regions(base: u64, dev_id: u8) -> [MemoryRegion; 4] {
    let shared = MemoryFlags::READ | MemoryFlags::ROOTSHARED;
    let output = |peer: u8| {
        let flags = if peer == dev_id {
            shared | MemoryFlags::WRITE
        } else {
            shared
        };
        MemoryRegion::identity(shmem_net_output_base(base, peer), SHMEM_NET_OUTPUT_SIZE, flags)
    };
    [
        MemoryRegion::identity(base, SHMEM_STATE_TABLE_SIZE, shared),
        MemoryRegion::PLACEHOLDER,
        output(0),
        output(1),
    ]
}
