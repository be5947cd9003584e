// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Platform configuration.
//!
//! Everything the validator and lifecycle controller need to know about the
//! machine that is not part of a cell descriptor. Defaults follow the ABI
//! layout constants.

use cellhv_abi::layout::{
    COMM_REGION_BASE, COMM_REGION_SIZE, DEFAULT_IRQ_PIN_COUNT, DEFAULT_PCI_MAX_BUS, PAGE_SIZE,
};
use std::fmt;
use std::time::Duration;

/// Default bound on a single enforcement collaborator call.
pub const DEFAULT_ENFORCEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default extra wait for a call that outlived its enforcement timeout.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// A comm region window: guest address and size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommWindow {
    /// Guest address of the window.
    pub virt_start: u64,
    /// Size of the window.
    pub size: u64,
}

impl CommWindow {
    /// Creates a window.
    #[must_use]
    pub const fn new(virt_start: u64, size: u64) -> Self {
        Self { virt_start, size }
    }
}

impl Default for CommWindow {
    fn default() -> Self {
        Self::new(COMM_REGION_BASE, COMM_REGION_SIZE)
    }
}

impl fmt::Display for CommWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{virt={:#x}, size={:#x}}}", self.virt_start, self.size)
    }
}

/// Static facts about the platform being partitioned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Minimum region alignment (a power of two).
    pub page_size: u64,
    /// Comm region window reserved by the root cell unless it declares its
    /// own.
    pub comm_region: CommWindow,
    /// Number of interrupt pins the platform's controllers expose.
    pub irq_pin_count: u32,
    /// Highest PCI bus number that may be assigned.
    pub pci_max_bus: u8,
    /// Every present CPU must belong to some cell.
    pub require_full_cpu_coverage: bool,
    /// Upper bound on one enforcement collaborator call.
    pub enforcement_timeout: Duration,
    /// How long a timed-out call may still take to land before the cell is
    /// left with a call in flight.
    pub settle_timeout: Duration,
}

impl PlatformConfig {
    /// Sets the comm region window.
    #[must_use]
    pub const fn with_comm_region(mut self, window: CommWindow) -> Self {
        self.comm_region = window;
        self
    }

    /// Sets the interrupt pin space size.
    #[must_use]
    pub const fn with_irq_pin_count(mut self, count: u32) -> Self {
        self.irq_pin_count = count;
        self
    }

    /// Sets the highest assignable PCI bus.
    #[must_use]
    pub const fn with_pci_max_bus(mut self, bus: u8) -> Self {
        self.pci_max_bus = bus;
        self
    }

    /// Requires every present CPU to be owned by some cell.
    #[must_use]
    pub const fn with_full_cpu_coverage(mut self, required: bool) -> Self {
        self.require_full_cpu_coverage = required;
        self
    }

    /// Sets the enforcement call timeout.
    #[must_use]
    pub const fn with_enforcement_timeout(mut self, timeout: Duration) -> Self {
        self.enforcement_timeout = timeout;
        self
    }

    /// Sets the wait for timed-out calls to land.
    #[must_use]
    pub const fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            comm_region: CommWindow::default(),
            irq_pin_count: DEFAULT_IRQ_PIN_COUNT,
            pci_max_bus: DEFAULT_PCI_MAX_BUS,
            require_full_cpu_coverage: false,
            enforcement_timeout: DEFAULT_ENFORCEMENT_TIMEOUT,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }
}
