// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Descriptor sources.
//!
//! A source hands out raw descriptor images. [`load_cell_set`] decodes
//! them, resolves their processor IDs and checks each one on its own. The
//! first image is the root cell, the rest are inmates in source order.
//! Cross-cell validation is left to the validator.


use crate::config::PlatformConfig;
use crate::cpu::CpuResolver;
use crate::descriptor::CellDescriptor;
use crate::error::{SourceError, ValidationError};
use crate::validator::{self, ValidatedCellSet};
use cellhv_abi::RawCellDescriptor;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extension of descriptor images in a [`DirectorySource`].
pub const CELL_FILE_EXTENSION: &str = "cell";

/// Supplier of raw descriptor images.
pub trait DescriptorSource {
    /// Returns every image in source order.
    fn read_all(&self) -> Result<Vec<Vec<u8>>, SourceError>;
}

// =============================================================================
// Memory Source
// =============================================================================

/// Images held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    images: Vec<Vec<u8>>,
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub const fn new() -> Self {
        Self { images: Vec::new() }
    }

    /// Appends an image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<Vec<u8>>) -> Self {
        self.images.push(image.into());
        self
    }

    /// Returns the number of images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Checks if the source holds no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl FromIterator<Vec<u8>> for MemorySource {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        Self {
            images: iter.into_iter().collect(),
        }
    }
}

impl DescriptorSource for MemorySource {
    fn read_all(&self) -> Result<Vec<Vec<u8>>, SourceError> {
        Ok(self.images.clone())
    }
}

// =============================================================================
// Directory Source
// =============================================================================

/// All `*.cell` files of one directory, ordered by file name.
///
/// Name the root cell's file so it sorts first, e.g. `00-root.cell`.
#[derive(Clone, Debug)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    /// Creates a source reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unavailable(&self, path: &Path, err: &std::io::Error) -> SourceError {
        debug!(dir = %self.dir.display(), "descriptor directory unreadable");
        SourceError::SourceUnavailable {
            reason: format!("{}: {err}", path.display()),
        }
    }

    fn cell_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let entries = fs::read_dir(&self.dir).map_err(|err| self.unavailable(&self.dir, &err))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| self.unavailable(&self.dir, &err))?;
            let path = entry.path();
            if path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == CELL_FILE_EXTENSION)
            {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }
}

impl DescriptorSource for DirectorySource {
    fn read_all(&self) -> Result<Vec<Vec<u8>>, SourceError> {
        self.cell_files()?
            .iter()
            .map(|path| {
                debug!(path = %path.display(), "reading descriptor");
                fs::read(path).map_err(|err| self.unavailable(path, &err))
            })
            .collect()
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Descriptors read from a source, checked one by one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedCells {
    /// The first image.
    pub root: CellDescriptor,
    /// Remaining images in source order.
    pub inmates: Vec<CellDescriptor>,
}

impl LoadedCells {
    /// Validates the descriptors as a fresh cell set.
    ///
    /// # Errors
    ///
    /// See [`validator::validate`].
    pub fn validate(
        self,
        platform: &PlatformConfig,
        resolver: &CpuResolver,
    ) -> Result<ValidatedCellSet, ValidationError> {
        validator::validate(platform, resolver, self.root, self.inmates)
    }
}

/// Reads, decodes and checks every image of `source`.
///
/// # Errors
///
/// - [`SourceError::SourceUnavailable`] if the source cannot be read
/// - [`SourceError::Empty`] if it holds no images
/// - [`SourceError::Format`] for an image that does not decode
/// - [`SourceError::Rejected`] for an image naming unknown processors or
///   failing its structural check
pub fn load_cell_set(
    source: &dyn DescriptorSource,
    platform: &PlatformConfig,
    resolver: &CpuResolver,
) -> Result<LoadedCells, SourceError> {
    let images = source.read_all()?;
    let mut cells = images
        .iter()
        .enumerate()
        .map(|(index, image)| decode_image(index, image, platform, resolver))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();
    let root = cells.next().ok_or(SourceError::Empty)?;
    let inmates: Vec<_> = cells.collect();
    info!(root = %root.name, inmates = inmates.len(), "descriptors loaded");
    Ok(LoadedCells { root, inmates })
}

fn decode_image(
    index: usize,
    image: &[u8],
    platform: &PlatformConfig,
    resolver: &CpuResolver,
) -> Result<CellDescriptor, SourceError> {
    let raw = RawCellDescriptor::decode(image).map_err(|source| SourceError::Format { index, source })?;
    let desc = CellDescriptor::from_raw(raw, resolver)
        .map_err(|source| SourceError::Rejected { index, source })?;
    desc.check(platform, resolver)
        .map_err(|err| SourceError::Rejected {
            index,
            source: err.into(),
        })?;
    debug!(index, cell = %desc.name, "descriptor decoded");
    Ok(desc)
}
