//! Loader context: the one long-lived owner of loader state.
//!
//! Created once at startup and passed by reference to every consumer; no
//! hidden process-wide statics. When the executable has no trailing
//! archive (running unpacked, e.g. under test) the context still
//! constructs, every accessor returns `None`, and resolution is simply
//! not applicable.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use capsule_vfs::{ArchiveAccessor, ArchiveError, VirtualFs};

use crate::extract::ExtractionCache;
use crate::resolve::EmbeddedResolver;

struct Packed {
    archive: Arc<ArchiveAccessor>,
    vfs: VirtualFs,
    cache: Arc<ExtractionCache>,
}

/// Long-lived loader state: archive accessor, virtual filesystem shim,
/// and extraction cache, torn down together at shutdown.
pub struct LoaderContext {
    exe_path: PathBuf,
    packed: Option<Packed>,
}

impl LoaderContext {
    /// Build a context for the currently running executable.
    pub fn from_current_exe() -> io::Result<Self> {
        Self::new(std::env::current_exe()?)
    }

    /// Build a context for the given composite executable.
    ///
    /// A missing archive is not an error: the context comes up unpacked
    /// and every lookup reports "not applicable".
    pub fn new(exe_path: PathBuf) -> io::Result<Self> {
        let packed = match ArchiveAccessor::open(&exe_path) {
            Ok(archive) => {
                let archive = Arc::new(archive);
                let vfs = VirtualFs::new(exe_path.clone(), Arc::clone(&archive))?;
                let cache = Arc::new(ExtractionCache::new(Arc::clone(&archive))?);
                Some(Packed {
                    archive,
                    vfs,
                    cache,
                })
            }
            Err(ArchiveError::NotAnArchive) => None,
            Err(ArchiveError::Io(e)) => return Err(e),
            Err(other) => return Err(io::Error::new(io::ErrorKind::InvalidData, other)),
        };
        Ok(Self { exe_path, packed })
    }

    /// Path of the executable this context serves.
    pub fn exe_path(&self) -> &Path {
        &self.exe_path
    }

    /// Whether a trailing archive was found.
    pub fn is_packed(&self) -> bool {
        self.packed.is_some()
    }

    /// The archive accessor, when packed.
    pub fn archive(&self) -> Option<&Arc<ArchiveAccessor>> {
        self.packed.as_ref().map(|p| &p.archive)
    }

    /// The virtual filesystem shim, when packed.
    pub fn vfs(&self) -> Option<&VirtualFs> {
        self.packed.as_ref().map(|p| &p.vfs)
    }

    /// The extraction cache, when packed.
    pub fn extraction_cache(&self) -> Option<&Arc<ExtractionCache>> {
        self.packed.as_ref().map(|p| &p.cache)
    }

    /// An archive-backed resolver for this context, when packed.
    pub fn embedded_resolver(&self, ext_suffix: &str) -> Option<EmbeddedResolver> {
        let packed = self.packed.as_ref()?;
        Some(EmbeddedResolver::new(
            Arc::clone(&packed.archive),
            Arc::clone(&packed.cache),
            ext_suffix,
        ))
    }
}
