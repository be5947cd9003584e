// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! PCI bus/device/function locator.

use core::fmt;

/// Maximum device number on a PCI bus (exclusive).
const MAX_DEVICE: u8 = 32;

/// Maximum function number of a PCI device (exclusive).
const MAX_FUNCTION: u8 = 8;

/// PCI bus/device/function locator.
///
/// Encoded as in configuration space addressing: bus in bits 15..8,
/// device in bits 7..3, function in bits 2..0.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Bdf(u16);

impl Bdf {
    /// Creates a BDF from its components.
    ///
    /// Returns `None` if `device >= 32` or `function >= 8`.
    #[inline]
    #[must_use]
    pub const fn new(bus: u8, device: u8, function: u8) -> Option<Self> {
        if device >= MAX_DEVICE || function >= MAX_FUNCTION {
            return None;
        }
        Some(Self(((bus as u16) << 8) | ((device as u16) << 3) | function as u16))
    }

    /// Creates a BDF from its raw 16-bit encoding.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw 16-bit encoding.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the bus number.
    #[inline]
    #[must_use]
    pub const fn bus(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Returns the device number (0-31).
    #[inline]
    #[must_use]
    pub const fn device(self) -> u8 {
        ((self.0 >> 3) & 0x1f) as u8
    }

    /// Returns the function number (0-7).
    #[inline]
    #[must_use]
    pub const fn function(self) -> u8 {
        (self.0 & 0x7) as u8
    }
}

impl fmt::Debug for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bdf({self})")
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{:x}",
            self.bus(),
            self.device(),
            self.function()
        )
    }
}
