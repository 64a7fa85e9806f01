use std::io;
use std::path::{Path, PathBuf};

use super::listing::{DirectoryListing, LocalDirectory};
use super::ArtifactPattern;
use crate::error::{ContractError, Result};

pub const DEFAULT_MAX_NAMING_ATTEMPTS: u32 = 1000;

/// Derives output file names from a directory snapshot.
///
/// Nothing is persisted between calls: the next number is always
/// `max(existing) + 1` at the moment of the scan. Two writers scanning the
/// same directory before either writes will pick the same start number; the
/// per-name existence retry in [`SequentialNamer::allocate`] narrows that
/// window but is not a lock.
#[derive(Debug, Clone)]
pub struct SequentialNamer<L = LocalDirectory> {
    listing: L,
    max_attempts: u32,
}

impl Default for SequentialNamer<LocalDirectory> {
    fn default() -> Self {
        Self::new(LocalDirectory)
    }
}

impl<L: DirectoryListing> SequentialNamer<L> {
    pub fn new(listing: L) -> Self {
        Self {
            listing,
            max_attempts: DEFAULT_MAX_NAMING_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// `max(parsed sequence numbers) + 1`, or 1 when nothing matches.
    /// Gaps are not filled.
    pub fn next_sequence(&self, directory: &Path, pattern: &ArtifactPattern) -> io::Result<u32> {
        let highest = self
            .listing
            .list_files(directory)?
            .iter()
            .filter_map(|file| pattern.sequence_of(&file.file_name))
            .max();
        Ok(highest.map_or(1, |value| value.saturating_add(1)))
    }

    /// Path for `start + offset`, bumped past any name that already exists.
    /// Gives up with `NamingExhausted` after `max_attempts` bumps.
    pub fn allocate(
        &self,
        directory: &Path,
        pattern: &ArtifactPattern,
        start: u32,
        offset: u32,
    ) -> Result<PathBuf> {
        let base = start.saturating_add(offset);
        let first_candidate = directory.join(pattern.file_name(base));
        let mut candidate = first_candidate.clone();
        let mut bumps = 0;
        while self.listing.exists(&candidate) {
            if bumps >= self.max_attempts {
                return Err(ContractError::NamingExhausted {
                    first_candidate,
                    attempts: self.max_attempts,
                });
            }
            bumps += 1;
            candidate = directory.join(pattern.file_name(base.saturating_add(bumps)));
        }
        Ok(candidate)
    }
}
