//! Filesystem capability used by the storage and config provisioners

use crate::{ProvisionError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// One entry below a walked directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub path: PathBuf,
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub len: u64,
}

/// Name of a timestamped backup folder, `tenant_{id}_{timestamp}`
pub fn backup_dir_name(tenant_id: &str) -> String {
    format!(
        "tenant_{}_{}",
        tenant_id,
        chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f")
    )
}

/// Filesystem operations needed for provisioning
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Create a directory and all missing parents
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Set unix permission bits
    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<()>;

    /// Write a whole file
    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Read a whole file
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    async fn exists(&self, path: &Path) -> bool;

    /// Names of the regular files directly inside `path`, sorted
    async fn list_files(&self, path: &Path) -> Result<Vec<String>>;

    /// Every entry below `path` (excluding `path` itself)
    async fn walk(&self, path: &Path) -> Result<Vec<FsEntry>>;

    /// Recursively copy `from` into `to`, returning the number of files copied
    async fn copy_tree(&self, from: &Path, to: &Path) -> Result<u64>;

    /// Recursively delete `path`, children before parents
    async fn remove_tree(&self, path: &Path) -> Result<()>;
}

/// Filesystem backed by the local disk
#[derive(Debug, Clone, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

fn walk_blocking(path: &Path) -> Result<Vec<FsEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(path).min_depth(1) {
        let entry = entry.map_err(|e| walk_error(path, e))?;
        let is_dir = entry.file_type().is_dir();
        let len = if is_dir {
            0
        } else {
            entry.metadata().map_err(|e| walk_error(path, e))?.len()
        };

        entries.push(FsEntry {
            path: entry.into_path(),
            is_dir,
            len,
        });
    }

    Ok(entries)
}

fn copy_tree_blocking(from: &Path, to: &Path) -> Result<u64> {
    std::fs::create_dir_all(to).map_err(|e| ProvisionError::io(to, e))?;
    let mut copied = 0;

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| walk_error(from, e))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| ProvisionError::Internal(e.to_string()))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| ProvisionError::io(&target, e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| ProvisionError::io(&target, e))?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn remove_tree_blocking(path: &Path) -> Result<()> {
    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry.map_err(|e| walk_error(path, e))?;
        let target = entry.path();

        if entry.file_type().is_dir() {
            std::fs::remove_dir(target).map_err(|e| ProvisionError::io(target, e))?;
        } else {
            std::fs::remove_file(target).map_err(|e| ProvisionError::io(target, e))?;
        }
    }

    Ok(())
}

fn walk_error(root: &Path, err: walkdir::Error) -> ProvisionError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
    ProvisionError::io(path, source)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProvisionError::Internal(format!("blocking task failed: {}", e)))?
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ProvisionError::io(path, e))
    }

    #[cfg(unix)]
    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| ProvisionError::io(path, e))
    }

    #[cfg(not(unix))]
    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        debug!(path = %path.display(), mode = format!("{:o}", mode), "Permission bits not supported on this platform");
        Ok(())
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| ProvisionError::io(path, e))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| ProvisionError::io(path, e))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn list_files(&self, path: &Path) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ProvisionError::io(path, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProvisionError::io(path, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ProvisionError::io(entry.path(), e))?;
            if file_type.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        files.sort();
        Ok(files)
    }

    async fn walk(&self, path: &Path) -> Result<Vec<FsEntry>> {
        let root = path.to_path_buf();
        blocking(move || walk_blocking(&root)).await
    }

    async fn copy_tree(&self, from: &Path, to: &Path) -> Result<u64> {
        let (from, to) = (from.to_path_buf(), to.to_path_buf());
        let copied = blocking(move || copy_tree_blocking(&from, &to)).await?;
        debug!(files = copied, "Copied directory tree");
        Ok(copied)
    }

    async fn remove_tree(&self, path: &Path) -> Result<()> {
        let root = path.to_path_buf();
        blocking(move || remove_tree_blocking(&root)).await
    }
}
