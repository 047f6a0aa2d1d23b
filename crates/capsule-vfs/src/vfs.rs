//! Virtual filesystem shim over the embedded archive.
//!
//! Intercepts file queries for paths that lexically fall under the running
//! executable's own path (`/opt/app/bin/app/pkg/data.json` when the
//! executable is `/opt/app/bin/app`) and answers them from the archive.
//! Paths outside the executable return `None` from every query: the caller
//! passes those through to the real filesystem.
//!
//! The shim is strictly read-only; write-mode opens are rejected.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::archive::{ArchiveAccessor, ArchiveError};
use crate::path::normalize;

/// Errors from virtual filesystem queries.
///
/// Misses carry the path the caller originally asked about, not the
/// translated archive path, so host error messages stay meaningful.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    /// The path does not exist in the archive.
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),

    /// A listing was requested on a file member.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A write-mode open was attempted on a virtual path.
    #[error("read-only filesystem: {0}")]
    ReadOnly(PathBuf),

    /// Underlying archive failure.
    #[error(transparent)]
    Archive(ArchiveError),
}

/// How a caller wants to open a virtual file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only access.
    Read,
    /// Any mutating access; always rejected by the shim.
    Write,
}

/// Synthesized file metadata for a virtual path.
///
/// The modification time is inherited from the host executable: the
/// archive's own per-member timestamps are not meaningful.
#[derive(Debug, Clone, Copy)]
pub struct StatResult {
    /// Decompressed size in bytes (0 for directories).
    pub size: u64,
    /// Directory type bit.
    pub is_dir: bool,
    /// Modification time of the host executable.
    pub modified: SystemTime,
}

/// The virtual filesystem shim.
pub struct VirtualFs {
    exe_path: PathBuf,
    exe_modified: SystemTime,
    archive: Arc<ArchiveAccessor>,
}

impl VirtualFs {
    /// Build a shim over an opened archive accessor.
    pub fn new(exe_path: PathBuf, archive: Arc<ArchiveAccessor>) -> std::io::Result<Self> {
        let exe_modified = std::fs::metadata(&exe_path)?.modified()?;
        Ok(Self {
            exe_path,
            exe_modified,
            archive,
        })
    }

    /// The executable path all virtual paths are rooted at.
    pub fn exe_path(&self) -> &Path {
        &self.exe_path
    }

    /// Translate an OS path to a virtual path.
    ///
    /// Returns `None` when the path does not lie under the executable; the
    /// caller should fall through to the real filesystem.
    pub fn translate(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.exe_path).ok()?;
        Some(normalize(&rel.to_string_lossy()))
    }

    /// Whether the path exists inside the archive.
    pub fn exists(&self, path: &Path) -> Option<bool> {
        Some(self.archive.exists(&self.translate(path)?))
    }

    /// Whether the path is a virtual directory.
    pub fn is_directory(&self, path: &Path) -> Option<bool> {
        Some(self.archive.is_directory(&self.translate(path)?))
    }

    /// Stat the path against the archive.
    pub fn stat(&self, path: &Path) -> Option<Result<StatResult, VfsError>> {
        let virtual_path = self.translate(path)?;
        Some(self.stat_virtual(&virtual_path).map_err(|e| with_original(e, path)))
    }

    /// Open the path for reading (write modes fail `ReadOnly`).
    pub fn open(
        &self,
        path: &Path,
        mode: OpenMode,
    ) -> Option<Result<Cursor<Vec<u8>>, VfsError>> {
        let virtual_path = self.translate(path)?;
        Some(
            self.open_virtual(&virtual_path, mode)
                .map_err(|e| with_original(e, path)),
        )
    }

    /// List the immediate children of a virtual directory.
    pub fn list(&self, path: &Path) -> Option<Result<Vec<String>, VfsError>> {
        let virtual_path = self.translate(path)?;
        Some(
            self.list_virtual(&virtual_path)
                .map_err(|e| with_original(e, path)),
        )
    }

    /// Stat by virtual path (already translated).
    pub fn stat_virtual(&self, virtual_path: &str) -> Result<StatResult, VfsError> {
        match self.archive.metadata(virtual_path) {
            Ok(info) => Ok(StatResult {
                size: info.size,
                is_dir: info.is_dir,
                modified: self.exe_modified,
            }),
            Err(e) => Err(map_archive(e, virtual_path)),
        }
    }

    /// Open by virtual path (already translated).
    pub fn open_virtual(
        &self,
        virtual_path: &str,
        mode: OpenMode,
    ) -> Result<Cursor<Vec<u8>>, VfsError> {
        if mode == OpenMode::Write {
            return Err(VfsError::ReadOnly(PathBuf::from(virtual_path)));
        }
        self.archive
            .open_for_read(virtual_path)
            .map_err(|e| map_archive(e, virtual_path))
    }

    /// List by virtual path (already translated).
    pub fn list_virtual(&self, virtual_path: &str) -> Result<Vec<String>, VfsError> {
        self.archive
            .list(virtual_path)
            .map_err(|e| map_archive(e, virtual_path))
    }
}

fn map_archive(err: ArchiveError, requested: &str) -> VfsError {
    match err {
        ArchiveError::NotFound(_) => VfsError::NotFound(PathBuf::from(requested)),
        ArchiveError::NotADirectory(_) => VfsError::NotADirectory(PathBuf::from(requested)),
        other => VfsError::Archive(other),
    }
}

/// Swap the translated path in an error for the caller's original one.
fn with_original(err: VfsError, original: &Path) -> VfsError {
    match err {
        VfsError::NotFound(_) => VfsError::NotFound(original.to_path_buf()),
        VfsError::NotADirectory(_) => VfsError::NotADirectory(original.to_path_buf()),
        VfsError::ReadOnly(_) => VfsError::ReadOnly(original.to_path_buf()),
        other => other,
    }
}
