use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

use crate::protocol::{unix_seconds, FileEntry};
use crate::{Error, Result};

/// The flat directory a server exposes. Read-shared by every session.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the served directory.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let root = std::fs::canonicalize(root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a client-supplied name to a path directly under the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Snapshot of regular files, sorted by name.
    pub async fn list(&self) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let metadata = match item.metadata().await {
                Ok(m) => m,
                // Vanished between readdir and stat
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = item.file_name().into_string() else {
                tracing::debug!(path = %item.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            entries.push(FileEntry {
                name,
                size: metadata.len(),
                modified: unix_seconds(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Metadata for one file.
    pub async fn entry(&self, name: &str) -> Result<FileEntry> {
        let path = self.resolve(name)?;
        let metadata = match fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => return Err(Error::FileNotFound(path)),
        };
        Ok(FileEntry {
            name: name.to_string(),
            size: metadata.len(),
            modified: unix_seconds(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
        })
    }
}

/// Names must denote a single component of the flat directory.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).is_absolute();
    if bad {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}
