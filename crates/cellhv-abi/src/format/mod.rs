// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Cell descriptor record format.
//!
//! A descriptor image is a packed, little-endian record: a fixed 128-byte
//! header followed by the variable-length entry arrays. Fields are written
//! one by one with explicit widths and explicit zero padding; the layout
//! never depends on how the host compiler lays out structs.
//!
//! # Header
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 6 | signature `"JHCELL"` |
//! | 6 | 2 | revision |
//! | 8 | 2 | architecture |
//! | 10 | 32 | name (NUL padded) |
//! | 42 | 2 | padding |
//! | 44 | 4 | flags |
//! | 48 | 4 | `num_cpus` |
//! | 52 | 4 | `num_memory_regions` |
//! | 56 | 4 | `num_irqchips` |
//! | 60 | 4 | `num_pio_regions` |
//! | 64 | 4 | `num_pci_devices` |
//! | 68 | 4 | `num_stream_ids` |
//! | 72 | 8 | `cpu_reset_address` |
//! | 80 | 16 | reserved |
//! | 96 | 32 | console |
//!
//! # Entry arrays (in order)
//!
//! | Array | Entry size |
//! |-------|------------|
//! | CPUs (`phys_id`) | 8 |
//! | memory regions | 32 |
//! | irqchips | 32 |
//! | port I/O regions | 4 |
//! | PCI devices | 52 |
//! | stream IDs | 4 |

mod wire;


use crate::flags::{CellFlags, ConsoleFlags, MemoryFlags};
use crate::layout::{CELL_NAME_FIELD_SIZE, CELL_NAME_MAXLEN, IRQCHIP_BITMAP_WORDS, IRQCHIP_PINS};
use crate::types::{Architecture, Bdf, PhysCpuId};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use wire::{Reader, Writer};

// =============================================================================
// Constants
// =============================================================================

/// Record signature.
pub const CELL_DESC_SIGNATURE: [u8; 6] = *b"JHCELL";

/// Record format revision understood by this crate.
pub const CONFIG_REVISION: u16 = 13;

/// Size of the fixed header, console block included.
pub const HEADER_SIZE: usize = 128;

/// Size of the console block at the end of the header.
pub const CONSOLE_SIZE: usize = 32;

/// Size of one CPU entry.
pub const CPU_ENTRY_SIZE: usize = 8;

/// Size of one memory region entry.
pub const MEMORY_ENTRY_SIZE: usize = 32;

/// Size of one irqchip entry.
pub const IRQCHIP_ENTRY_SIZE: usize = 32;

/// Size of one port I/O region entry.
pub const PIO_ENTRY_SIZE: usize = 4;

/// Size of one PCI device entry.
pub const PCI_ENTRY_SIZE: usize = 52;

/// Size of one stream ID entry.
pub const STREAM_ID_ENTRY_SIZE: usize = 4;

/// Padding between the name field and the flags.
const NAME_PADDING: usize = 2;

/// Reserved bytes between `cpu_reset_address` and the console block.
const HEADER_RESERVED: usize = 16;

// =============================================================================
// Errors
// =============================================================================

/// Error while encoding or decoding a descriptor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// The record does not start with [`CELL_DESC_SIGNATURE`].
    BadSignature,
    /// The record was written for a different format revision.
    UnsupportedRevision {
        /// Revision found in the record.
        found: u16,
    },
    /// The architecture tag is not known.
    UnknownArchitecture(u16),
    /// The record ends before a field could be read.
    Truncated {
        /// Offset of the failed read.
        offset: usize,
    },
    /// Bytes remain after the last entry array.
    TrailingBytes {
        /// Number of unconsumed bytes.
        count: usize,
    },
    /// Padding or reserved bytes are not zero.
    NonZeroPadding {
        /// Offset of the padding field.
        offset: usize,
    },
    /// The name field is not NUL terminated, not NUL padded or not UTF-8.
    InvalidName,
    /// The name is longer than [`CELL_NAME_MAXLEN`] bytes.
    NameTooLong {
        /// Length of the rejected name.
        len: usize,
    },
    /// Unknown PCI device type.
    UnknownPciType(u8),
    /// Unknown console type.
    UnknownConsoleType(u16),
    /// A boolean field holds something other than 0 or 1.
    InvalidBool {
        /// Offset of the field.
        offset: usize,
    },
    /// Port I/O regions or stream IDs on an architecture that has none.
    UnexpectedArchPayload {
        /// Architecture of the record.
        arch: Architecture,
    },
    /// An entry array does not fit a 32-bit count.
    TooManyEntries,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => write!(f, "bad descriptor signature"),
            Self::UnsupportedRevision { found } => write!(
                f,
                "unsupported descriptor revision {found} (expected {CONFIG_REVISION})"
            ),
            Self::UnknownArchitecture(tag) => write!(f, "unknown architecture tag {tag}"),
            Self::Truncated { offset } => write!(f, "descriptor truncated at offset {offset}"),
            Self::TrailingBytes { count } => write!(f, "{count} trailing bytes after descriptor"),
            Self::NonZeroPadding { offset } => {
                write!(f, "non-zero padding at offset {offset}")
            }
            Self::InvalidName => write!(f, "cell name is not a NUL padded UTF-8 string"),
            Self::NameTooLong { len } => {
                write!(f, "cell name is {len} bytes (max {CELL_NAME_MAXLEN})")
            }
            Self::UnknownPciType(tag) => write!(f, "unknown PCI device type {tag}"),
            Self::UnknownConsoleType(tag) => write!(f, "unknown console type {tag}"),
            Self::InvalidBool { offset } => write!(f, "invalid boolean at offset {offset}"),
            Self::UnexpectedArchPayload { arch } => {
                write!(f, "architecture payload not supported on {arch}")
            }
            Self::TooManyEntries => write!(f, "entry array exceeds 32-bit count"),
        }
    }
}

impl core::error::Error for FormatError {}

// =============================================================================
// Entry Records
// =============================================================================

/// A memory region entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    /// Host physical start address.
    pub phys_start: u64,
    /// Cell-visible start address (0 for relocatable RAM).
    pub virt_start: u64,
    /// Length in bytes.
    pub size: u64,
    /// Access and placement flags.
    pub flags: MemoryFlags,
}

impl MemoryRegion {
    /// Creates a region mapped at the given addresses.
    #[inline]
    #[must_use]
    pub const fn new(phys_start: u64, virt_start: u64, size: u64, flags: MemoryFlags) -> Self {
        Self {
            phys_start,
            virt_start,
            size,
            flags,
        }
    }

    /// Creates an identity-mapped region (`virt_start == phys_start`).
    #[inline]
    #[must_use]
    pub const fn identity(phys_start: u64, size: u64, flags: MemoryFlags) -> Self {
        Self::new(phys_start, phys_start, size, flags)
    }

    /// Creates a comm region entry at the given guest address.
    #[inline]
    #[must_use]
    pub const fn comm_region(virt_start: u64, size: u64) -> Self {
        Self::new(
            0,
            virt_start,
            size,
            MemoryFlags::COMM_REGION_ACCESS.union(MemoryFlags::COMM_REGION),
        )
    }

    /// An empty placeholder entry (zero size, no flags).
    pub const PLACEHOLDER: Self = Self::new(0, 0, 0, MemoryFlags::empty());

    /// Returns the exclusive physical end, or `None` on address overflow.
    #[inline]
    #[must_use]
    pub const fn phys_end(&self) -> Option<u64> {
        self.phys_start.checked_add(self.size)
    }

    /// Returns the exclusive cell-visible end, or `None` on address overflow.
    #[inline]
    #[must_use]
    pub const fn virt_end(&self) -> Option<u64> {
        self.virt_start.checked_add(self.size)
    }

    /// Checks if this is the comm region entry.
    #[inline]
    #[must_use]
    pub const fn is_comm_region(&self) -> bool {
        self.flags.contains(MemoryFlags::COMM_REGION)
    }

    /// Checks if this is an empty placeholder entry.
    #[inline]
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        self.size == 0 && self.flags.is_empty()
    }

    /// Checks if this region is shared with the root cell.
    #[inline]
    #[must_use]
    pub const fn is_rootshared(&self) -> bool {
        self.flags.contains(MemoryFlags::ROOTSHARED)
    }

    /// Checks if the region occupies host physical memory.
    ///
    /// Comm regions are allocated by the hypervisor and placeholders are
    /// empty, so neither takes part in physical overlap checks.
    #[inline]
    #[must_use]
    pub const fn is_physically_backed(&self) -> bool {
        !self.is_comm_region() && !self.is_placeholder()
    }

    /// Checks if two regions' physical ranges intersect.
    ///
    /// Ranges are half-open: `[phys_start, phys_start + size)`. Ranges that
    /// would wrap the address space are clamped at `u64::MAX`.
    #[inline]
    #[must_use]
    pub const fn phys_overlaps(&self, other: &Self) -> bool {
        if self.size == 0 || other.size == 0 {
            return false;
        }
        let self_end = self.phys_start.saturating_add(self.size);
        let other_end = other.phys_start.saturating_add(other.size);
        self.phys_start < other_end && other.phys_start < self_end
    }

    fn encode(&self, w: &mut Writer) {
        w.u64(self.phys_start);
        w.u64(self.virt_start);
        w.u64(self.size);
        w.u64(self.flags.bits());
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, FormatError> {
        Ok(Self {
            phys_start: r.u64()?,
            virt_start: r.u64()?,
            size: r.u64()?,
            flags: MemoryFlags::from_bits_retain(r.u64()?),
        })
    }
}

/// An interrupt chip entry granting pins to a cell.
///
/// Each entry covers [`IRQCHIP_PINS`] pins starting at `pin_base`; pin `p`
/// lives in word `(p - pin_base) / 32`, bit `(p - pin_base) % 32`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IrqChip {
    /// MMIO address of the interrupt controller.
    pub address: u64,
    /// Controller ID (IOAPIC ID on x86, unused on ARM).
    pub id: u32,
    /// First pin covered by `pin_bitmap`.
    pub pin_base: u32,
    /// Pin ownership bitmap.
    pub pin_bitmap: [u32; IRQCHIP_BITMAP_WORDS],
}

impl IrqChip {
    /// Creates an entry with no pins assigned.
    #[inline]
    #[must_use]
    pub const fn new(address: u64, pin_base: u32) -> Self {
        Self {
            address,
            id: 0,
            pin_base,
            pin_bitmap: [0; IRQCHIP_BITMAP_WORDS],
        }
    }

    /// Checks if `pin` falls into the range covered by this entry.
    #[inline]
    #[must_use]
    pub const fn covers(&self, pin: u32) -> bool {
        pin >= self.pin_base && pin - self.pin_base < IRQCHIP_PINS
    }

    /// Checks if `pin` is assigned by this entry.
    #[inline]
    #[must_use]
    pub const fn owns(&self, pin: u32) -> bool {
        if !self.covers(pin) {
            return false;
        }
        let offset = pin - self.pin_base;
        self.pin_bitmap[(offset / 32) as usize] & (1 << (offset % 32)) != 0
    }

    /// Assigns `pin`. Returns `false` if the pin is outside this entry.
    pub const fn assign(&mut self, pin: u32) -> bool {
        if !self.covers(pin) {
            return false;
        }
        let offset = pin - self.pin_base;
        self.pin_bitmap[(offset / 32) as usize] |= 1 << (offset % 32);
        true
    }

    /// Builder-style variant of [`assign`](Self::assign); out-of-range pins
    /// are ignored.
    #[must_use]
    pub const fn with_pin(mut self, pin: u32) -> Self {
        self.assign(pin);
        self
    }

    /// Returns an iterator over the assigned pins in ascending order.
    pub fn pins(&self) -> impl Iterator<Item = u32> + '_ {
        (0..IRQCHIP_PINS)
            .filter(|offset| self.pin_bitmap[(offset / 32) as usize] & (1 << (offset % 32)) != 0)
            .map(|offset| self.pin_base + offset)
    }

    fn encode(&self, w: &mut Writer) {
        w.u64(self.address);
        w.u32(self.id);
        w.u32(self.pin_base);
        for word in self.pin_bitmap {
            w.u32(word);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, FormatError> {
        let address = r.u64()?;
        let id = r.u32()?;
        let pin_base = r.u32()?;
        let mut pin_bitmap = [0; IRQCHIP_BITMAP_WORDS];
        for word in &mut pin_bitmap {
            *word = r.u32()?;
        }
        Ok(Self {
            address,
            id,
            pin_base,
            pin_bitmap,
        })
    }
}

/// An x86 port I/O range granted to a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PioRegion {
    /// First port.
    pub base: u16,
    /// Number of ports.
    pub length: u16,
}

impl PioRegion {
    /// Creates a port range.
    #[inline]
    #[must_use]
    pub const fn new(base: u16, length: u16) -> Self {
        Self { base, length }
    }

    /// Returns the exclusive end port as `u32` (may be `0x1_0000`).
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.base as u32 + self.length as u32
    }

    /// Checks if two port ranges intersect.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.length != 0
            && other.length != 0
            && (self.base as u32) < other.end()
            && (other.base as u32) < self.end()
    }
}

/// Classification of an assigned PCI function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PciType {
    /// Physical pass-through endpoint.
    Device = 1,
    /// Physical pass-through bridge.
    Bridge = 2,
    /// Virtual shared-memory device (inter-cell link).
    Ivshmem = 3,
}

impl PciType {
    /// Try to convert from the raw record value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Device),
            2 => Some(Self::Bridge),
            3 => Some(Self::Ivshmem),
            _ => None,
        }
    }
}

/// A PCI device assignment entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PciDevice {
    /// Device classification.
    pub kind: PciType,
    /// IOMMU unit the device sits behind.
    pub iommu: u8,
    /// PCI segment.
    pub domain: u16,
    /// Bus/device/function.
    pub bdf: Bdf,
    /// Writable bits of each BAR as seen by the cell.
    pub bar_mask: [u32; 6],
    /// Number of MSI vectors.
    pub num_msi_vectors: u8,
    /// MSI capability supports 64-bit addresses.
    pub msi_64bits: bool,
    /// Number of MSI-X vectors.
    pub num_msix_vectors: u16,
    /// Size of the MSI-X table region.
    pub msix_region_size: u16,
    /// Address of the MSI-X table.
    pub msix_address: u64,
    /// Index of the first memory region of the shared-memory group.
    pub shmem_regions_start: u32,
    /// This peer's identity on the link.
    pub shmem_dev_id: u8,
    /// Number of peers on the link.
    pub shmem_peers: u8,
    /// Protocol spoken over the link.
    pub shmem_protocol: u16,
}

impl PciDevice {
    /// Creates a pass-through assignment with no virtualization hints.
    #[must_use]
    pub const fn new(kind: PciType, bdf: Bdf) -> Self {
        Self {
            kind,
            iommu: 0,
            domain: 0,
            bdf,
            bar_mask: [0; 6],
            num_msi_vectors: 0,
            msi_64bits: false,
            num_msix_vectors: 0,
            msix_region_size: 0,
            msix_address: 0,
            shmem_regions_start: 0,
            shmem_dev_id: 0,
            shmem_peers: 0,
            shmem_protocol: 0,
        }
    }

    /// Creates a shared-memory device entry.
    #[must_use]
    pub const fn ivshmem(
        bdf: Bdf,
        shmem_regions_start: u32,
        shmem_dev_id: u8,
        shmem_peers: u8,
        shmem_protocol: u16,
    ) -> Self {
        let mut dev = Self::new(PciType::Ivshmem, bdf);
        dev.shmem_regions_start = shmem_regions_start;
        dev.shmem_dev_id = shmem_dev_id;
        dev.shmem_peers = shmem_peers;
        dev.shmem_protocol = shmem_protocol;
        dev
    }

    /// Checks if this is a shared-memory device.
    #[inline]
    #[must_use]
    pub const fn is_shmem(&self) -> bool {
        matches!(self.kind, PciType::Ivshmem)
    }

    fn encode(&self, w: &mut Writer) {
        w.u8(self.kind as u8);
        w.u8(self.iommu);
        w.u16(self.domain);
        w.u16(self.bdf.as_u16());
        for mask in self.bar_mask {
            w.u32(mask);
        }
        w.u8(self.num_msi_vectors);
        w.u8(u8::from(self.msi_64bits));
        w.u16(self.num_msix_vectors);
        w.u16(self.msix_region_size);
        w.u64(self.msix_address);
        w.u32(self.shmem_regions_start);
        w.u8(self.shmem_dev_id);
        w.u8(self.shmem_peers);
        w.u16(self.shmem_protocol);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, FormatError> {
        let tag = r.u8()?;
        let kind = PciType::from_u8(tag).ok_or(FormatError::UnknownPciType(tag))?;
        let iommu = r.u8()?;
        let domain = r.u16()?;
        let bdf = Bdf::from_raw(r.u16()?);
        let mut bar_mask = [0; 6];
        for mask in &mut bar_mask {
            *mask = r.u32()?;
        }
        let num_msi_vectors = r.u8()?;
        let msi_64bits = read_bool(r)?;
        Ok(Self {
            kind,
            iommu,
            domain,
            bdf,
            bar_mask,
            num_msi_vectors,
            msi_64bits,
            num_msix_vectors: r.u16()?,
            msix_region_size: r.u16()?,
            msix_address: r.u64()?,
            shmem_regions_start: r.u32()?,
            shmem_dev_id: r.u8()?,
            shmem_peers: r.u8()?,
            shmem_protocol: r.u16()?,
        })
    }
}

/// Hardware type of a cell console.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ConsoleType {
    /// No console.
    None = 0,
    /// EFI framebuffer.
    EfiFb = 1,
    /// 8250-compatible UART.
    Uart8250 = 2,
    /// ARM PL011 UART.
    Pl011 = 3,
    /// Xilinx PS UART.
    XuartPs = 4,
    /// Marvell EBU UART.
    Mvebu = 5,
    /// Renesas HSCIF.
    Hscif = 6,
    /// Renesas SCIFA.
    Scifa = 7,
    /// i.MX UART.
    Imx = 8,
}

impl ConsoleType {
    /// Try to convert from the raw record value.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::EfiFb),
            2 => Some(Self::Uart8250),
            3 => Some(Self::Pl011),
            4 => Some(Self::XuartPs),
            5 => Some(Self::Mvebu),
            6 => Some(Self::Hscif),
            7 => Some(Self::Scifa),
            8 => Some(Self::Imx),
            _ => None,
        }
    }
}

/// Console block of a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Console {
    /// Register base (MMIO address or I/O port).
    pub address: u64,
    /// Size of the register window.
    pub size: u32,
    /// Hardware type.
    pub console_type: ConsoleType,
    /// Access flags.
    pub flags: ConsoleFlags,
    /// Baud rate divider (0 keeps the firmware setting).
    pub divider: u32,
    /// Clock gate number.
    pub gate_nr: u32,
    /// Clock gate register address.
    pub clock_reg: u64,
}

impl Console {
    /// The "no console" block.
    pub const NONE: Self = Self {
        address: 0,
        size: 0,
        console_type: ConsoleType::None,
        flags: ConsoleFlags::empty(),
        divider: 0,
        gate_nr: 0,
        clock_reg: 0,
    };

    /// Creates a console of the given type with no clock parameters.
    #[must_use]
    pub const fn new(address: u64, console_type: ConsoleType, flags: ConsoleFlags) -> Self {
        Self {
            address,
            size: 0,
            console_type,
            flags,
            divider: 0,
            gate_nr: 0,
            clock_reg: 0,
        }
    }

    /// Checks if the block describes no console.
    #[inline]
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self.console_type, ConsoleType::None)
    }

    fn encode(&self, w: &mut Writer) {
        w.u64(self.address);
        w.u32(self.size);
        w.u16(self.console_type as u16);
        w.u16(self.flags.bits());
        w.u32(self.divider);
        w.u32(self.gate_nr);
        w.u64(self.clock_reg);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, FormatError> {
        let address = r.u64()?;
        let size = r.u32()?;
        let tag = r.u16()?;
        let console_type = ConsoleType::from_u16(tag).ok_or(FormatError::UnknownConsoleType(tag))?;
        Ok(Self {
            address,
            size,
            console_type,
            flags: ConsoleFlags::from_bits_retain(r.u16()?),
            divider: r.u32()?,
            gate_nr: r.u32()?,
            clock_reg: r.u64()?,
        })
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::NONE
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// A cell descriptor exactly as persisted.
///
/// CPUs are listed by hardware identifier; resolving them to logical
/// indices is the partition layer's job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCellDescriptor {
    /// Target architecture.
    pub architecture: Architecture,
    /// Cell name (at most [`CELL_NAME_MAXLEN`] bytes).
    pub name: String,
    /// Cell flags.
    pub flags: CellFlags,
    /// Entry address for the cell's boot CPU.
    pub cpu_reset_address: u64,
    /// Hardware IDs of the CPUs owned by the cell.
    pub cpus: Vec<PhysCpuId>,
    /// Memory regions, in placement order.
    pub memory_regions: Vec<MemoryRegion>,
    /// Interrupt pin grants.
    pub irqchips: Vec<IrqChip>,
    /// Port I/O grants (x86 only).
    pub pio_regions: Vec<PioRegion>,
    /// PCI device assignments.
    pub pci_devices: Vec<PciDevice>,
    /// SMMU stream IDs (arm64 only).
    pub stream_ids: Vec<u32>,
    /// Console block.
    pub console: Console,
}

impl RawCellDescriptor {
    /// Creates an empty descriptor.
    #[must_use]
    pub fn new(name: &str, architecture: Architecture) -> Self {
        Self {
            architecture,
            name: String::from(name),
            flags: CellFlags::empty(),
            cpu_reset_address: 0,
            cpus: Vec::new(),
            memory_regions: Vec::new(),
            irqchips: Vec::new(),
            pio_regions: Vec::new(),
            pci_devices: Vec::new(),
            stream_ids: Vec::new(),
            console: Console::NONE,
        }
    }

    /// Returns the size of the encoded record in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + self.cpus.len() * CPU_ENTRY_SIZE
            + self.memory_regions.len() * MEMORY_ENTRY_SIZE
            + self.irqchips.len() * IRQCHIP_ENTRY_SIZE
            + self.pio_regions.len() * PIO_ENTRY_SIZE
            + self.pci_devices.len() * PCI_ENTRY_SIZE
            + self.stream_ids.len() * STREAM_ID_ENTRY_SIZE
    }

    /// Serializes the descriptor into its persisted record.
    ///
    /// # Errors
    ///
    /// Fails if the name does not fit the name field, an entry array does
    /// not fit a 32-bit count, or the architecture payload does not match
    /// the architecture.
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        self.check_arch_payload()?;
        let name = encode_name(&self.name)?;

        let mut w = Writer::with_capacity(self.encoded_len());
        w.bytes(&CELL_DESC_SIGNATURE);
        w.u16(CONFIG_REVISION);
        w.u16(self.architecture.as_u16());
        w.bytes(&name);
        w.zeros(NAME_PADDING);
        w.u32(self.flags.bits());
        w.u32(count(self.cpus.len())?);
        w.u32(count(self.memory_regions.len())?);
        w.u32(count(self.irqchips.len())?);
        w.u32(count(self.pio_regions.len())?);
        w.u32(count(self.pci_devices.len())?);
        w.u32(count(self.stream_ids.len())?);
        w.u64(self.cpu_reset_address);
        w.zeros(HEADER_RESERVED);
        self.console.encode(&mut w);
        debug_assert_eq!(w.len(), HEADER_SIZE);

        for cpu in &self.cpus {
            w.u64(cpu.as_u64());
        }
        for region in &self.memory_regions {
            region.encode(&mut w);
        }
        for chip in &self.irqchips {
            chip.encode(&mut w);
        }
        for pio in &self.pio_regions {
            w.u16(pio.base);
            w.u16(pio.length);
        }
        for dev in &self.pci_devices {
            dev.encode(&mut w);
        }
        for sid in &self.stream_ids {
            w.u32(*sid);
        }
        debug_assert_eq!(w.len(), self.encoded_len());

        Ok(w.finish())
    }

    /// Parses a persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature or revision does not match, a tag
    /// is unknown, the data is truncated or followed by trailing bytes.
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(data);

        if r.array::<6>()? != CELL_DESC_SIGNATURE {
            return Err(FormatError::BadSignature);
        }
        let revision = r.u16()?;
        if revision != CONFIG_REVISION {
            return Err(FormatError::UnsupportedRevision { found: revision });
        }
        let arch_tag = r.u16()?;
        let architecture =
            Architecture::from_u16(arch_tag).ok_or(FormatError::UnknownArchitecture(arch_tag))?;
        let name = decode_name(&r.array::<CELL_NAME_FIELD_SIZE>()?)?;
        expect_zero(&mut r, NAME_PADDING)?;
        let flags = CellFlags::from_bits_retain(r.u32()?);

        let num_cpus = r.u32()?;
        let num_memory_regions = r.u32()?;
        let num_irqchips = r.u32()?;
        let num_pio_regions = r.u32()?;
        let num_pci_devices = r.u32()?;
        let num_stream_ids = r.u32()?;
        let cpu_reset_address = r.u64()?;
        expect_zero(&mut r, HEADER_RESERVED)?;
        let console = Console::decode(&mut r)?;

        let cpus = read_array(&mut r, num_cpus, CPU_ENTRY_SIZE, |r| {
            r.u64().map(PhysCpuId::new)
        })?;
        let memory_regions =
            read_array(&mut r, num_memory_regions, MEMORY_ENTRY_SIZE, MemoryRegion::decode)?;
        let irqchips = read_array(&mut r, num_irqchips, IRQCHIP_ENTRY_SIZE, IrqChip::decode)?;
        let pio_regions = read_array(&mut r, num_pio_regions, PIO_ENTRY_SIZE, |r| {
            Ok(PioRegion::new(r.u16()?, r.u16()?))
        })?;
        let pci_devices = read_array(&mut r, num_pci_devices, PCI_ENTRY_SIZE, PciDevice::decode)?;
        let stream_ids = read_array(&mut r, num_stream_ids, STREAM_ID_ENTRY_SIZE, Reader::u32)?;

        if r.remaining() != 0 {
            return Err(FormatError::TrailingBytes {
                count: r.remaining(),
            });
        }

        let desc = Self {
            architecture,
            name,
            flags,
            cpu_reset_address,
            cpus,
            memory_regions,
            irqchips,
            pio_regions,
            pci_devices,
            stream_ids,
            console,
        };
        desc.check_arch_payload()?;
        Ok(desc)
    }

    fn check_arch_payload(&self) -> Result<(), FormatError> {
        let unexpected = match self.architecture {
            Architecture::X86 => !self.stream_ids.is_empty(),
            Architecture::Arm => !self.pio_regions.is_empty() || !self.stream_ids.is_empty(),
            Architecture::Arm64 => !self.pio_regions.is_empty(),
        };
        if unexpected {
            return Err(FormatError::UnexpectedArchPayload {
                arch: self.architecture,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn count(len: usize) -> Result<u32, FormatError> {
    u32::try_from(len).map_err(|_| FormatError::TooManyEntries)
}

fn encode_name(name: &str) -> Result<[u8; CELL_NAME_FIELD_SIZE], FormatError> {
    let bytes = name.as_bytes();
    if bytes.len() > CELL_NAME_MAXLEN {
        return Err(FormatError::NameTooLong { len: bytes.len() });
    }
    if bytes.contains(&0) {
        return Err(FormatError::InvalidName);
    }
    let mut field = [0u8; CELL_NAME_FIELD_SIZE];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

fn decode_name(field: &[u8; CELL_NAME_FIELD_SIZE]) -> Result<String, FormatError> {
    let len = field
        .iter()
        .position(|b| *b == 0)
        .ok_or(FormatError::InvalidName)?;
    if field[len..].iter().any(|b| *b != 0) {
        return Err(FormatError::InvalidName);
    }
    core::str::from_utf8(&field[..len])
        .map(String::from)
        .map_err(|_| FormatError::InvalidName)
}

fn expect_zero(r: &mut Reader<'_>, len: usize) -> Result<(), FormatError> {
    let offset = r.offset();
    if r.take(len)?.iter().any(|b| *b != 0) {
        return Err(FormatError::NonZeroPadding { offset });
    }
    Ok(())
}

fn read_bool(r: &mut Reader<'_>) -> Result<bool, FormatError> {
    let offset = r.offset();
    match r.u8()? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(FormatError::InvalidBool { offset }),
    }
}

/// Reads `count` entries, refusing counts the remaining data cannot hold
/// before allocating for them.
fn read_array<'a, T>(
    r: &mut Reader<'a>,
    count: u32,
    entry_size: usize,
    mut read: impl FnMut(&mut Reader<'a>) -> Result<T, FormatError>,
) -> Result<Vec<T>, FormatError> {
    let count = count as usize;
    let needed = count
        .checked_mul(entry_size)
        .ok_or(FormatError::Truncated { offset: r.offset() })?;
    if needed > r.remaining() {
        return Err(FormatError::Truncated { offset: r.offset() });
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read(r)?);
    }
    Ok(out)
}

// Compile-time verification of the record layout
const _: () = {
    assert!(
        6 + 2 + 2 + CELL_NAME_FIELD_SIZE + NAME_PADDING + 4 + 6 * 4 + 8 + HEADER_RESERVED
            + CONSOLE_SIZE
            == HEADER_SIZE
    );
    assert!(1 + 1 + 2 + 2 + 6 * 4 + 1 + 1 + 2 + 2 + 8 + 4 + 1 + 1 + 2 == PCI_ENTRY_SIZE);
    assert!(8 + 4 + 4 + IRQCHIP_BITMAP_WORDS * 4 == IRQCHIP_ENTRY_SIZE);
};
