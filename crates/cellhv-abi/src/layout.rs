// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Platform ABI constants.
//!
//! These values are shared by the descriptor format, the partition validator
//! and the enforcement backends. Changing any of them breaks existing images.
//!
//! # Comm region window
//!
//! ```text
//! 0x0000_0000_8000_0000  comm region (4 KB, RW, hypervisor allocated)
//! ```
//!
//! # Shared-memory (IVSHMEM) region group
//!
//! ```text
//! +0x00000  state table     4 KB    R    (all peers)
//! +0x01000  r/w section     0 B          (placeholder entry)
//! +0x01000  output peer 0   508 KB  RW for peer 0, R for others
//! +0x80000  output peer 1   508 KB  RW for peer 1, R for others
//! ```

/// One kilobyte in bytes.
const KB: u64 = 1024;

/// Standard page size (4 KB).
pub const PAGE_SIZE: u64 = 4 * KB;

/// Page size shift (log2 of `PAGE_SIZE`).
pub const PAGE_SHIFT: u32 = 12;

// =============================================================================
// Cell Name
// =============================================================================

/// Maximum length of a cell name in bytes (excluding the terminating NUL).
pub const CELL_NAME_MAXLEN: usize = 31;

/// Size of the NUL-padded name field in the record.
pub const CELL_NAME_FIELD_SIZE: usize = CELL_NAME_MAXLEN + 1;

// =============================================================================
// Comm Region
// =============================================================================

/// Default guest address of the comm region.
pub const COMM_REGION_BASE: u64 = 0x8000_0000;

/// Default size of the comm region (one page).
pub const COMM_REGION_SIZE: u64 = PAGE_SIZE;

// =============================================================================
// Interrupt Chips
// =============================================================================

/// Number of bits in one pin bitmap word.
pub const PIN_WORD_BITS: u32 = 32;

/// Number of bitmap words per irqchip entry.
pub const IRQCHIP_BITMAP_WORDS: usize = 4;

/// Number of pins covered by one irqchip entry.
pub const IRQCHIP_PINS: u32 = PIN_WORD_BITS * IRQCHIP_BITMAP_WORDS as u32;

/// Default size of the interrupt pin space (GICv2 maximum).
pub const DEFAULT_IRQ_PIN_COUNT: u32 = 1024;

// =============================================================================
// PCI / IVSHMEM
// =============================================================================

/// Maximum number of peers on one shared-memory link.
pub const MAX_SHMEM_PEERS: u8 = 16;

/// Number of memory regions making up a 2-peer shared-memory network link.
pub const SHMEM_NET_REGION_COUNT: u32 = 4;

/// Size of the shared-memory state table.
pub const SHMEM_STATE_TABLE_SIZE: u64 = PAGE_SIZE;

/// Size of one peer's output section in a shared-memory network link.
pub const SHMEM_NET_OUTPUT_SIZE: u64 = 0x7_f000;

/// Shared-memory protocol: undefined / raw.
pub const SHMEM_PROTO_UNDEFINED: u16 = 0x0000;

/// Shared-memory protocol: virtual ethernet.
pub const SHMEM_PROTO_VETH: u16 = 0x0001;

/// BAR mask of an IVSHMEM device using legacy INTx.
pub const IVSHMEM_BAR_MASK_INTX: [u32; 6] = [0xffff_f000, 0, 0, 0, 0, 0];

/// BAR mask of an IVSHMEM device using MSI-X.
pub const IVSHMEM_BAR_MASK_MSIX: [u32; 6] = [0xffff_f000, 0xffff_fe00, 0, 0, 0, 0];

/// Default highest PCI bus number handed out to cells.
pub const DEFAULT_PCI_MAX_BUS: u8 = 0xff;

// =============================================================================
// Port I/O (x86)
// =============================================================================

/// Size of the x86 port I/O space.
pub const PIO_SPACE_SIZE: u32 = 0x1_0000;

/// Returns the guest address of peer `dev_id`'s output section within a
/// shared-memory network link starting at `base`.
#[inline]
#[must_use]
pub const fn shmem_net_output_base(base: u64, dev_id: u8) -> u64 {
    base + SHMEM_STATE_TABLE_SIZE + (dev_id as u64) * SHMEM_NET_OUTPUT_SIZE
}

// Compile-time verification of the layout
const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(COMM_REGION_BASE % PAGE_SIZE == 0);
    assert!(COMM_REGION_SIZE % PAGE_SIZE == 0);
    assert!(DEFAULT_IRQ_PIN_COUNT % IRQCHIP_PINS == 0);
    assert!(SHMEM_NET_OUTPUT_SIZE % PAGE_SIZE == 0);
    assert!(shmem_net_output_base(0, 1) == 0x8_0000);
};
