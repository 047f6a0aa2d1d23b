//! Native library extraction and dependency patching.
//!
//! The OS dynamic linker can only load libraries that exist as real files
//! with resolvable search paths, so a compiled member is copied out of the
//! archive into a scratch directory, its runtime search path is rewritten
//! in place to `$ORIGIN`, and every needed library that also lives in the
//! archive is extracted next to it, recursively.
//!
//! Per member path the cache records a settled outcome, `Ready` or
//! `Failed`, shared with every later caller. At most one dependency chain
//! is extracted at a time: a chain-level flight lock serializes the
//! recursive work, so concurrent requests for the same member extract it
//! once, and requests for mutually dependent members issued from
//! different threads cannot deadlock. Cycles inside one chain are broken
//! with a visited set threaded through the recursion.

use std::collections::{HashMap, HashSet};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use capsule_elf::{ElfImage, FormatError, RunPath};
use capsule_vfs::path as vpath;
use capsule_vfs::{ArchiveAccessor, ArchiveError};

/// The relative-to-self marker written into rewritten search paths.
pub const REWRITE_TOKEN: &str = "$ORIGIN";

/// Upper bound on dependency chain depth.
pub const MAX_CHAIN_DEPTH: usize = 64;

/// Errors from native module extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The archive member disappeared between lookup and read.
    #[error("archive member vanished: {0}")]
    SourceMissing(String),

    /// The scratch directory is not writable. Fatal: the loader cannot
    /// function without scratch space.
    #[error("cannot write extracted file: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// A dependency chain exceeded [`MAX_CHAIN_DEPTH`] levels.
    #[error("dependency chain too deep at {0}")]
    ChainTooDeep(String),

    /// The member is not a parseable ELF image.
    #[error("invalid native module {path}: {source}")]
    Format {
        /// Archive path of the offending member.
        path: String,
        /// Underlying parse failure.
        #[source]
        source: FormatError,
    },

    /// Underlying archive failure.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// A previous extraction of this member failed; the stored error is
    /// shared with every later caller.
    #[error("extraction of {path} failed earlier: {message}")]
    Failed {
        /// Archive path of the member.
        path: String,
        /// Message of the original failure.
        message: String,
    },
}

enum EntryState {
    Ready(PathBuf),
    Failed(String),
}

/// Single-flight extraction cache, keyed by archive member path.
///
/// Owns the scratch directory; dropping the cache deletes every extracted
/// file (best-effort on normal process exit — a leaked scratch directory
/// on abnormal termination is an accepted limitation).
pub struct ExtractionCache {
    archive: Arc<ArchiveAccessor>,
    scratch: TempDir,
    state: Mutex<HashMap<String, EntryState>>,
    flight: Mutex<()>,
    generation: AtomicU64,
    extractions: AtomicUsize,
    warnings: Mutex<Vec<String>>,
}

impl ExtractionCache {
    /// Create a cache with a fresh process-private scratch directory.
    pub fn new(archive: Arc<ArchiveAccessor>) -> std::io::Result<Self> {
        let scratch = tempfile::Builder::new().prefix("capsule-").tempdir()?;
        Ok(Self {
            archive,
            scratch,
            state: Mutex::new(HashMap::new()),
            flight: Mutex::new(()),
            generation: AtomicU64::new(0),
            extractions: AtomicUsize::new(0),
            warnings: Mutex::new(Vec::new()),
        })
    }

    /// Root of the scratch directory extracted chains live under.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Number of extractions performed so far (instrumentation).
    pub fn extractions(&self) -> usize {
        self.extractions.load(Ordering::Relaxed)
    }

    /// Recoverable warnings emitted so far (rewrite-too-long cases).
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    /// Resolve an archive member to a loadable filesystem path.
    ///
    /// Idempotent: a `Ready` member short-circuits to its cached path as
    /// long as the backing file still exists. A miss takes the flight
    /// lock, so one chain is extracted at a time and every waiter gets
    /// the settled outcome.
    pub fn resolve(&self, member: &str) -> Result<PathBuf, ExtractError> {
        let member = vpath::normalize(member);
        if let Some(settled) = self.settled(&member) {
            return settled;
        }
        let _flight = self.flight.lock();
        let mut visited = HashSet::new();
        self.resolve_inner(&member, None, None, &mut visited, 0)
    }

    /// The cached outcome for a member, if it has settled.
    fn settled(&self, member: &str) -> Option<Result<PathBuf, ExtractError>> {
        let state = self.state.lock();
        match state.get(member) {
            Some(EntryState::Ready(path)) if path.exists() => Some(Ok(path.clone())),
            Some(EntryState::Failed(message)) => Some(Err(ExtractError::Failed {
                path: member.to_string(),
                message: message.clone(),
            })),
            // a vanished backing file is extracted again
            _ => None,
        }
    }

    fn resolve_inner(
        &self,
        member: &str,
        inherited: Option<&str>,
        chain_dir: Option<&Path>,
        visited: &mut HashSet<String>,
        depth: usize,
    ) -> Result<PathBuf, ExtractError> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(ExtractError::ChainTooDeep(member.to_string()));
        }
        if let Some(settled) = self.settled(member) {
            return settled;
        }
        if visited.contains(member) {
            // Cycle within this chain: the member is being extracted
            // higher up the recursion and its file will be in place before
            // the chain completes. Treat as satisfied.
            if let Some(dir) = chain_dir {
                return Ok(dir.join(vpath::base_name(member)));
            }
        }
        visited.insert(member.to_string());

        let result = self.extract_and_patch(member, inherited, chain_dir, visited, depth);
        let mut state = self.state.lock();
        match &result {
            Ok(path) => state.insert(member.to_string(), EntryState::Ready(path.clone())),
            Err(e) => state.insert(member.to_string(), EntryState::Failed(e.to_string())),
        };
        result
    }

    fn extract_and_patch(
        &self,
        member: &str,
        inherited: Option<&str>,
        chain_dir: Option<&Path>,
        visited: &mut HashSet<String>,
        depth: usize,
    ) -> Result<PathBuf, ExtractError> {
        let bytes = match self.archive.read(member) {
            Ok(bytes) => bytes,
            Err(ArchiveError::NotFound(_)) => {
                return Err(ExtractError::SourceMissing(member.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        // All members of one chain share one directory so the rewritten
        // $ORIGIN finds its siblings at load time.
        let owned_dir;
        let dir: &Path = match chain_dir {
            Some(dir) => dir,
            None => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let stem = Path::new(vpath::base_name(member))
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "module".to_string());
                owned_dir = self.scratch.path().join(format!("{}-{}", generation, stem));
                std::fs::create_dir_all(&owned_dir).map_err(ExtractError::WriteFailed)?;
                &owned_dir
            }
        };

        let dest = dir.join(vpath::base_name(member));
        std::fs::write(&dest, &bytes).map_err(ExtractError::WriteFailed)?;
        set_owner_only(&dest)?;
        self.extractions.fetch_add(1, Ordering::Relaxed);

        let image = match ElfImage::parse(&bytes) {
            Ok(image) => image,
            // no dependencies, no rewrite needed
            Err(FormatError::NoDynamicSection) => return Ok(dest),
            Err(e) => {
                return Err(ExtractError::Format {
                    path: member.to_string(),
                    source: e,
                })
            }
        };

        // A member with its own search path gets it rewritten in place; a
        // member without one inherits the parent's template for dependency
        // lookup only and is never written.
        let mut template: Option<String> = inherited.map(str::to_string);
        if let Some(rp) = image.runpath() {
            if REWRITE_TOKEN.len() > rp.text.len() {
                // cannot grow a fixed-width field in place
                let message = format!(
                    "runtime search path `{}` in {} is shorter than {}; \
                     bundled dependencies on that path stay unextracted",
                    rp.text, member, REWRITE_TOKEN
                );
                eprintln!("capsule: warning: {}", message);
                self.warnings.lock().push(message);
                template = None;
            } else {
                rewrite_search_path(&dest, rp)?;
                template = Some(rp.text.clone());
            }
        }

        if let Some(template) = template {
            let member_dir = vpath::parent(member);
            for needed in image.needed() {
                if let Some(dep) = self.find_in_archive(&template, member_dir, needed) {
                    self.resolve_inner(&dep, Some(&template), Some(dir), visited, depth + 1)?;
                }
            }
        }

        Ok(dest)
    }

    /// Resolve a search-path template against the member's own directory
    /// and probe the archive for the needed library.
    fn find_in_archive(&self, template: &str, member_dir: &str, needed: &str) -> Option<String> {
        for element in template.split(':').filter(|e| !e.is_empty()) {
            let dir = element.replace(REWRITE_TOKEN, member_dir);
            let candidate = vpath::join(&vpath::normalize(&dir), needed);
            if self.archive.is_file(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

/// Overwrite the search path string in place with `$ORIGIN` + NUL,
/// preserving total length. The parser recorded the exact file offset.
fn rewrite_search_path(dest: &Path, rp: &RunPath) -> Result<(), ExtractError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(dest)
        .map_err(ExtractError::WriteFailed)?;
    file.seek(SeekFrom::Start(rp.file_offset))
        .map_err(ExtractError::WriteFailed)?;
    let mut patched = REWRITE_TOKEN.as_bytes().to_vec();
    patched.push(0);
    file.write_all(&patched).map_err(ExtractError::WriteFailed)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<(), ExtractError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(ExtractError::WriteFailed)
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<(), ExtractError> {
    Ok(())
}
