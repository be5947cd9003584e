// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Sparse interrupt pin ownership.
//!
//! Pin spaces are large and mostly empty, so ownership is kept as an arena
//! of 32-bit words keyed by `(chip address, pin / 32)`. The word and bit of
//! a pin are always computed, never stored.

use crate::descriptor::IrqRouting;
use cellhv_abi::IrqChip;
use cellhv_abi::layout::PIN_WORD_BITS;
use std::collections::BTreeMap;

/// Returns the `(word, bit)` position of a pin.
#[inline]
#[must_use]
pub const fn pin_location(pin: u32) -> (u32, u32) {
    (pin / PIN_WORD_BITS, pin % PIN_WORD_BITS)
}

/// Union of pin grants, addressed by chip and word.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PinArena {
    words: BTreeMap<(u64, u32), u32>,
}

impl PinArena {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: BTreeMap::new(),
        }
    }

    /// Builds the arena of one cell's routing.
    ///
    /// Entries of the same cell that grant the same pin are merged; that is
    /// not a conflict.
    #[must_use]
    pub fn from_routing(routing: &IrqRouting) -> Self {
        let mut arena = Self::new();
        for chip in routing.chips() {
            arena.insert_chip(chip);
        }
        arena
    }

    /// Merges an irqchip entry's bitmap.
    pub fn insert_chip(&mut self, chip: &IrqChip) {
        let (first_word, _) = pin_location(chip.pin_base);
        for (word, bits) in (first_word..).zip(chip.pin_bitmap) {
            if bits != 0 {
                *self.words.entry((chip.address, word)).or_default() |= bits;
            }
        }
    }

    /// Checks if the arena grants `pin` of the chip at `address`.
    #[must_use]
    pub fn owns(&self, address: u64, pin: u32) -> bool {
        let (word, bit) = pin_location(pin);
        self.words
            .get(&(address, word))
            .is_some_and(|bits| bits & (1 << bit) != 0)
    }

    /// Claims every pin of `other`.
    ///
    /// # Errors
    ///
    /// Returns the lowest `(chip address, pin)` that is already owned.
    pub fn claim(&mut self, other: &Self) -> Result<(), (u64, u32)> {
        for (&(address, word), &bits) in &other.words {
            let slot = self.words.entry((address, word)).or_default();
            let clash = *slot & bits;
            if clash != 0 {
                return Err((address, word * PIN_WORD_BITS + clash.trailing_zeros()));
            }
            *slot |= bits;
        }
        Ok(())
    }

    /// Returns the number of owned pins.
    #[must_use]
    pub fn pin_count(&self) -> u32 {
        self.words.values().map(|bits| bits.count_ones()).sum()
    }
}
