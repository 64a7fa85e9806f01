use std::cmp::Reverse;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::listing::{DirectoryListing, LocalDirectory};
use super::{ArtifactPattern, DateBucket};

pub const DEFAULT_RECONCILE_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// A matching file observed on disk. Never created by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub path: PathBuf,
    pub sequence_number: Option<u32>,
    pub date_bucket: DateBucket,
    pub modified: SystemTime,
}

/// Recovers a result set from the save directory when in-memory results are
/// missing.
///
/// The correlation is approximate: any matching file modified inside the age
/// window is assumed to belong to the current batch. Nothing ties a file to
/// the worker that produced it.
#[derive(Debug, Clone, Default)]
pub struct ResultReconciler<L = LocalDirectory> {
    listing: L,
}

impl<L: DirectoryListing> ResultReconciler<L> {
    pub fn new(listing: L) -> Self {
        Self { listing }
    }

    pub fn scan(
        &self,
        directory: &Path,
        pattern: &ArtifactPattern,
        max_age: Duration,
        limit: usize,
    ) -> io::Result<Vec<SavedArtifact>> {
        self.scan_at(directory, pattern, max_age, limit, SystemTime::now())
    }

    /// Newest-first matches modified less than `max_age` before `now`,
    /// truncated to `limit`. Files stamped in the future count as fresh.
    pub fn scan_at(
        &self,
        directory: &Path,
        pattern: &ArtifactPattern,
        max_age: Duration,
        limit: usize,
        now: SystemTime,
    ) -> io::Result<Vec<SavedArtifact>> {
        let mut artifacts: Vec<SavedArtifact> = self
            .listing
            .list_files(directory)?
            .into_iter()
            .filter(|file| pattern.matches(&file.file_name))
            .filter(|file| {
                let age = now.duration_since(file.modified).unwrap_or_default();
                age < max_age
            })
            .map(|file| SavedArtifact {
                sequence_number: pattern.sequence_of(&file.file_name),
                path: file.path,
                date_bucket: pattern.bucket().clone(),
                modified: file.modified,
            })
            .collect();

        artifacts.sort_by_key(|artifact| {
            (
                Reverse(artifact.modified),
                Reverse(artifact.sequence_number),
            )
        });
        artifacts.truncate(limit);
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    use chrono::NaiveDate;

    use super::{ResultReconciler, DEFAULT_RECONCILE_MAX_AGE};
    use crate::artifacts::{ArtifactPattern, DateBucket, LocalDirectory};

    fn pattern() -> ArtifactPattern {
        let date = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap_or_default();
        ArtifactPattern::new("banana", DateBucket::from_date(date), "png")
    }

    fn write_aged(dir: &Path, name: &str, age: Duration, now: SystemTime) -> anyhow::Result<()> {
        let path = dir.join(name);
        std::fs::write(&path, b"image")?;
        let file = File::options().write(true).open(&path)?;
        file.set_modified(now - age)?;
        Ok(())
    }

    #[test]
    fn returns_recent_matches_newest_first() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let now = SystemTime::now();
        write_aged(temp.path(), "banana_1sep_001.png", Duration::from_secs(40), now)?;
        write_aged(temp.path(), "banana_1sep_002.png", Duration::from_secs(10), now)?;
        write_aged(temp.path(), "banana_1sep_003.png", Duration::from_secs(20), now)?;

        let reconciler = ResultReconciler::new(LocalDirectory);
        let found = reconciler.scan_at(temp.path(), &pattern(), DEFAULT_RECONCILE_MAX_AGE, 10, now)?;
        let sequences: Vec<Option<u32>> = found.iter().map(|a| a.sequence_number).collect();
        assert_eq!(sequences, vec![Some(2), Some(3), Some(1)]);
        assert!(found.iter().all(|a| a.date_bucket.as_str() == "1sep"));
        Ok(())
    }

    #[test]
    fn stale_and_foreign_files_are_ignored() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let now = SystemTime::now();
        write_aged(temp.path(), "banana_1sep_001.png", Duration::from_secs(600), now)?;
        write_aged(temp.path(), "banana_2sep_002.png", Duration::from_secs(5), now)?;
        write_aged(temp.path(), "notes.txt", Duration::from_secs(5), now)?;

        let reconciler = ResultReconciler::new(LocalDirectory);
        let found = reconciler.scan_at(temp.path(), &pattern(), DEFAULT_RECONCILE_MAX_AGE, 4, now)?;
        assert!(found.is_empty());
        Ok(())
    }

    #[test]
    fn truncates_to_limit() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let now = SystemTime::now();
        for (seq, age) in [(1, 50), (2, 40), (3, 30), (4, 20)] {
            write_aged(
                temp.path(),
                &pattern().file_name(seq),
                Duration::from_secs(age),
                now,
            )?;
        }

        let reconciler = ResultReconciler::new(LocalDirectory);
        let found = reconciler.scan_at(temp.path(), &pattern(), DEFAULT_RECONCILE_MAX_AGE, 2, now)?;
        let sequences: Vec<Option<u32>> = found.iter().map(|a| a.sequence_number).collect();
        assert_eq!(sequences, vec![Some(4), Some(3)]);
        Ok(())
    }

    #[test]
    fn missing_directory_yields_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let reconciler = ResultReconciler::new(LocalDirectory);
        let found = reconciler.scan(&temp.path().join("gone"), &pattern(), DEFAULT_RECONCILE_MAX_AGE, 2)?;
        assert!(found.is_empty());
        Ok(())
    }
}
