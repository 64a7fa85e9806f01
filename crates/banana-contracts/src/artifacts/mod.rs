mod listing;
mod location;
mod naming;
mod reconcile;

use std::fmt;

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

pub use listing::{DirectoryListing, ListedFile, LocalDirectory};
pub use location::{SaveLocation, DEFAULT_SAVE_FOLDER};
pub use naming::{SequentialNamer, DEFAULT_MAX_NAMING_ATTEMPTS};
pub use reconcile::{ResultReconciler, SavedArtifact, DEFAULT_RECONCILE_MAX_AGE};

pub const DEFAULT_PREFIX: &str = "banana";
pub const DEFAULT_EXTENSION: &str = "png";

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Day-of-month plus lowercase month abbreviation, e.g. "1sep".
///
/// There is no year component: the same calendar day in different years
/// maps to the same bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateBucket(String);

impl DateBucket {
    pub fn from_date(date: NaiveDate) -> Self {
        let month = MONTH_ABBREVIATIONS[date.month0() as usize];
        Self(format!("{}{}", date.day(), month))
    }

    pub fn today() -> Self {
        Self::from_date(Local::now().date_naive())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `{prefix}_{bucket}_{seq:03}.{extension}` naming scheme shared by the
/// namer and the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPattern {
    prefix: String,
    bucket: DateBucket,
    extension: String,
}

impl ArtifactPattern {
    pub fn new(prefix: impl Into<String>, bucket: DateBucket, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            prefix: prefix.into(),
            bucket,
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bucket(&self) -> &DateBucket {
        &self.bucket
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn file_name(&self, sequence: u32) -> String {
        format!(
            "{}_{}_{:03}.{}",
            self.prefix, self.bucket, sequence, self.extension
        )
    }

    pub fn glob(&self) -> String {
        format!("{}_{}_*.{}", self.prefix, self.bucket, self.extension)
    }

    /// Glob-style match: `{prefix}_{bucket}_` then anything then `.{extension}`.
    pub fn matches(&self, file_name: &str) -> bool {
        self.wildcard(file_name).is_some()
    }

    /// Numeric segment of a matching name. Non-numeric segments yield None.
    pub fn sequence_of(&self, file_name: &str) -> Option<u32> {
        let segment = self.wildcard(file_name)?;
        if segment.is_empty() || !segment.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        segment.parse().ok()
    }

    fn wildcard<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let head = format!("{}_{}_", self.prefix, self.bucket);
        let tail = format!(".{}", self.extension);
        if file_name.len() < head.len() + tail.len() {
            return None;
        }
        file_name.strip_prefix(head.as_str())?.strip_suffix(tail.as_str())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{ArtifactPattern, DateBucket};

    fn bucket(year: i32, month: u32, day: u32) -> DateBucket {
        DateBucket::from_date(NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default())
    }

    #[test]
    fn date_bucket_is_day_then_month_without_year() {
        assert_eq!(bucket(2025, 9, 1).as_str(), "1sep");
        assert_eq!(bucket(2026, 10, 19).as_str(), "19oct");
        assert_eq!(bucket(2024, 9, 1), bucket(2025, 9, 1));
    }

    #[test]
    fn pattern_formats_zero_padded_names() {
        let pattern = ArtifactPattern::new("banana", bucket(2025, 9, 1), ".png");
        assert_eq!(pattern.file_name(1), "banana_1sep_001.png");
        assert_eq!(pattern.file_name(1234), "banana_1sep_1234.png");
        assert_eq!(pattern.glob(), "banana_1sep_*.png");
    }

    #[test]
    fn pattern_matching_and_sequence_parsing() {
        let pattern = ArtifactPattern::new("banana", bucket(2025, 9, 1), "png");
        assert_eq!(pattern.sequence_of("banana_1sep_007.png"), Some(7));
        assert_eq!(pattern.sequence_of("banana_1sep_1000.png"), Some(1000));
        assert!(pattern.matches("banana_1sep_copy.png"));
        assert_eq!(pattern.sequence_of("banana_1sep_copy.png"), None);
        assert!(!pattern.matches("banana_11sep_001.png"));
        assert!(!pattern.matches("banana_1sep_001.jpg"));
        assert!(!pattern.matches("other_1sep_001.png"));
        assert!(!pattern.matches("banana_1sep_.pn"));
    }
}
