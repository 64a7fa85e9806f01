use std::path::{Path, PathBuf};

use banana_contracts::artifacts::{ArtifactPattern, DirectoryListing, SequentialNamer};
use banana_contracts::batch::SaveFailure;

#[derive(Debug, Default)]
pub(crate) struct PersistReport {
    /// `(result_index, path)` in result order.
    pub(crate) saved: Vec<(usize, PathBuf)>,
    pub(crate) errors: Vec<SaveFailure>,
}

/// Writes each valid result under the next free sequence numbers.
///
/// One `next_sequence` snapshot is taken for the whole batch and result `i`
/// (counting valid results only) is allocated `start + i`. Blobs of
/// `min_bytes` or fewer are skipped. A failure affects only its own result.
pub(crate) fn save_results<L: DirectoryListing>(
    namer: &SequentialNamer<L>,
    directory: &Path,
    pattern: &ArtifactPattern,
    results: &[Vec<u8>],
    min_bytes: usize,
) -> PersistReport {
    let mut report = PersistReport::default();

    let mut valid = Vec::new();
    for (result_index, bytes) in results.iter().enumerate() {
        if bytes.len() > min_bytes {
            valid.push((result_index, bytes));
        } else {
            report.errors.push(SaveFailure {
                result_index,
                message: format!(
                    "result has {} bytes (needs more than {min_bytes}); skipped",
                    bytes.len()
                ),
            });
        }
    }
    if valid.is_empty() {
        return report;
    }

    if let Err(err) = std::fs::create_dir_all(directory) {
        fail_all(&mut report, &valid, &format!("cannot create {}: {err}", directory.display()));
        return report;
    }
    let start = match namer.next_sequence(directory, pattern) {
        Ok(start) => start,
        Err(err) => {
            fail_all(&mut report, &valid, &format!("cannot list {}: {err}", directory.display()));
            return report;
        }
    };

    for (offset, (result_index, bytes)) in valid.into_iter().enumerate() {
        let offset = u32::try_from(offset).unwrap_or(u32::MAX);
        let path = match namer.allocate(directory, pattern, start, offset) {
            Ok(path) => path,
            Err(err) => {
                report.errors.push(SaveFailure {
                    result_index,
                    message: err.to_string(),
                });
                continue;
            }
        };
        match std::fs::write(&path, bytes) {
            Ok(()) => report.saved.push((result_index, path)),
            Err(err) => report.errors.push(SaveFailure {
                result_index,
                message: format!("failed to write {}: {err}", path.display()),
            }),
        }
    }
    report
}

fn fail_all(report: &mut PersistReport, valid: &[(usize, &Vec<u8>)], message: &str) {
    for (result_index, _) in valid {
        report.errors.push(SaveFailure {
            result_index: *result_index,
            message: message.to_string(),
        });
    }
}
