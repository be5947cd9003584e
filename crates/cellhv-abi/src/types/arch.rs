// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Target architecture tag.

use core::fmt;

/// Instruction-set tag carried in every cell descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Architecture {
    /// x86-64 with VT-x/SVM.
    X86 = 0,
    /// 32-bit ARMv7 with virtualization extensions.
    Arm = 1,
    /// `AArch64`.
    Arm64 = 2,
}

impl Architecture {
    /// Try to convert from the raw record value.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::X86),
            1 => Some(Self::Arm),
            2 => Some(Self::Arm64),
            _ => None,
        }
    }

    /// Returns the raw record value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Short lowercase name, as used in image file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
        }
    }
}

impl fmt::Debug for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86 => write!(f, "X86"),
            Self::Arm => write!(f, "Arm"),
            Self::Arm64 => write!(f, "Arm64"),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
