// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Dense bitmap of logical CPU indices.

use cellhv_abi::CpuIndex;
use std::fmt;

const WORD_BITS: usize = u64::BITS as usize;

/// A set of logical CPUs.
///
/// Stored as a bitmap over the dense logical index space. Trailing zero words
/// are never kept, so two sets with the same members compare equal.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet {
    words: Vec<u64>,
}

impl CpuSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Adds a CPU. Returns `false` if it was already present.
    pub fn insert(&mut self, cpu: CpuIndex) -> bool {
        let (word, bit) = Self::locate(cpu);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let was_set = self.words[word] & bit != 0;
        self.words[word] |= bit;
        !was_set
    }

    /// Removes a CPU. Returns `false` if it was not present.
    pub fn remove(&mut self, cpu: CpuIndex) -> bool {
        let (word, bit) = Self::locate(cpu);
        let Some(slot) = self.words.get_mut(word) else {
            return false;
        };
        let was_set = *slot & bit != 0;
        *slot &= !bit;
        self.trim();
        was_set
    }

    /// Checks membership.
    #[must_use]
    pub fn contains(&self, cpu: CpuIndex) -> bool {
        let (word, bit) = Self::locate(cpu);
        self.words.get(word).is_some_and(|w| w & bit != 0)
    }

    /// Returns the number of CPUs in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Checks if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Returns the lowest CPU present in both sets.
    #[must_use]
    pub fn first_common(&self, other: &Self) -> Option<CpuIndex> {
        self.words
            .iter()
            .zip(&other.words)
            .enumerate()
            .find_map(|(i, (a, b))| {
                let common = a & b;
                (common != 0).then(|| Self::index(i, common.trailing_zeros()))
            })
    }

    /// Adds every member of `other`.
    pub fn union_with(&mut self, other: &Self) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= src;
        }
    }

    /// Returns the members of `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut out = Self {
            words: self
                .words
                .iter()
                .enumerate()
                .map(|(i, w)| w & !other.words.get(i).copied().unwrap_or(0))
                .collect(),
        };
        out.trim();
        out
    }

    /// Returns the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = CpuIndex> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..u64::BITS)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| Self::index(i, bit))
        })
    }

    fn locate(cpu: CpuIndex) -> (usize, u64) {
        let index = cpu.as_usize();
        (index / WORD_BITS, 1 << (index % WORD_BITS))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn index(word: usize, bit: u32) -> CpuIndex {
        // Indices originate from `CpuIndex` values, so they fit in u32.
        CpuIndex::new((word * WORD_BITS) as u32 + bit)
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl FromIterator<CpuIndex> for CpuSet {
    fn from_iter<I: IntoIterator<Item = CpuIndex>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<CpuIndex> for CpuSet {
    fn extend<I: IntoIterator<Item = CpuIndex>>(&mut self, iter: I) {
        for cpu in iter {
            self.insert(cpu);
        }
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(CpuIndex::as_u32)).finish()
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, cpu) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", cpu.as_u32())?;
        }
        f.write_str("}")
    }
}
