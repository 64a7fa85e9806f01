use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub modified: SystemTime,
}

/// Directory listing capability used by the namer and the reconciler.
pub trait DirectoryListing: Send + Sync {
    /// Regular files directly inside `directory`. A missing directory lists as empty.
    fn list_files(&self, directory: &Path) -> io::Result<Vec<ListedFile>>;

    fn exists(&self, path: &Path) -> bool;
}

impl<T: DirectoryListing + ?Sized> DirectoryListing for Arc<T> {
    fn list_files(&self, directory: &Path) -> io::Result<Vec<ListedFile>> {
        (**self).list_files(directory)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDirectory;

impl DirectoryListing for LocalDirectory {
    fn list_files(&self, directory: &Path) -> io::Result<Vec<ListedFile>> {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            files.push(ListedFile {
                path: entry.path(),
                file_name,
                modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            });
        }
        Ok(files)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::{DirectoryListing, LocalDirectory};

    #[test]
    fn lists_regular_files_only() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::write(temp.path().join("a.png"), b"a")?;
        std::fs::create_dir(temp.path().join("nested"))?;

        let files = LocalDirectory.list_files(temp.path())?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "a.png");
        assert!(LocalDirectory.exists(&files[0].path));
        Ok(())
    }

    #[test]
    fn missing_directory_lists_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let files = LocalDirectory.list_files(&temp.path().join("missing"))?;
        assert!(files.is_empty());
        Ok(())
    }
}
