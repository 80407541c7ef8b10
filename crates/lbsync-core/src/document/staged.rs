// # Staged File
//
// Write-then-rename helper for replacing the proxy configuration.
//
// - `write()`: content goes to `<target>.tmp` with the target's permissions
//   and is synced to disk; a partial temp file is removed on failure
// - `commit()`: previous target is copied to `<target>.bak`, then the temp
//   file is renamed over the target
// - `discard()`: temp file is removed, target untouched

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;

/// A fully written temp file waiting to replace its target
#[derive(Debug)]
#[must_use = "a staged file must be committed or discarded"]
pub struct StagedFile {
    path: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    /// Write `content` to the staging path for `target`
    pub(crate) async fn write(target: &Path, content: &[u8]) -> Result<Self, Error> {
        let path = Self::temp_path(target);

        if let Err(e) = write_temp(&path, target, content).await {
            return Err(remove_partial(&path, e).await);
        }

        tracing::trace!("Staged {} bytes at {}", content.len(), path.display());

        Ok(Self {
            path,
            target: target.to_path_buf(),
        })
    }

    /// Path of the staged temp file (what a validator should check)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the staged file will replace
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically replace the target with the staged content
    pub async fn commit(self) -> Result<(), Error> {
        // Keep the last installed config around for operators
        if fs::try_exists(&self.target).await.unwrap_or(false) {
            let backup = Self::backup_path(&self.target);
            if let Err(e) = fs::copy(&self.target, &backup).await {
                tracing::warn!("Failed to create backup {}: {}", backup.display(), e);
            }
        }

        fs::rename(&self.path, &self.target).await.map_err(|e| {
            io_error(
                e,
                format!(
                    "Failed to rename {} to {}",
                    self.path.display(),
                    self.target.display()
                ),
            )
        })?;

        tracing::debug!("Installed {}", self.target.display());
        Ok(())
    }

    /// Drop the staged content, leaving the target untouched
    pub async fn discard(self) {
        if let Err(e) = fs::remove_file(&self.path).await {
            tracing::warn!("Failed to remove temp file {}: {}", self.path.display(), e);
        }
    }

    /// `<target>.tmp`, in the same directory so the rename stays atomic
    pub fn temp_path(target: &Path) -> PathBuf {
        with_suffix(target, ".tmp")
    }

    /// `<target>.bak`
    pub fn backup_path(target: &Path) -> PathBuf {
        with_suffix(target, ".bak")
    }
}

async fn write_temp(path: &Path, target: &Path, content: &[u8]) -> Result<(), Error> {
    let mut file = fs::File::create(path).await.map_err(|e| {
        io_error(e, format!("Failed to create temp file {}", path.display()))
    })?;

    file.write_all(content).await.map_err(|e| {
        io_error(e, format!("Failed to write to temp file {}", path.display()))
    })?;

    // The rename would otherwise install the file with the process umask
    match fs::metadata(target).await {
        Ok(meta) => fs::set_permissions(path, meta.permissions())
            .await
            .map_err(|e| {
                io_error(
                    e,
                    format!("Failed to copy permissions of {}", target.display()),
                )
            })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(io_error(
                e,
                format!("Failed to read metadata of {}", target.display()),
            ));
        }
    }

    file.sync_all().await.map_err(|e| {
        io_error(e, format!("Failed to sync temp file {}", path.display()))
    })
}

/// Remove a half-written temp file, passing `error` through
async fn remove_partial(path: &Path, error: Error) -> Error {
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed partial temp file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove temp file {}: {}", path.display(), e),
    }
    error
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error(e: std::io::Error, context: String) -> Error {
    Error::Io(std::io::Error::new(e.kind(), format!("{}: {}", context, e)))
}
