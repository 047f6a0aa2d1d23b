//! Module/resource resolution hook.
//!
//! The integration point a host runtime's import machinery calls: "does
//! this logical name exist, and if it is a compiled extension, give me a
//! loadable file path". Resolvers are composed into an ordered chain; the
//! embedded-archive resolver is one implementation among others, and a
//! `None` answer falls through to the host's normal resolution.

use std::path::PathBuf;
use std::sync::Arc;

use capsule_vfs::path as vpath;
use capsule_vfs::{ArchiveAccessor, ArchiveError};

use crate::extract::{ExtractError, ExtractionCache};

/// Default filename suffix for compiled extension members.
pub const DEFAULT_EXT_SUFFIX: &str = ".so";

/// Errors from resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Native module extraction failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Underlying archive failure.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// A data resource, served straight from the virtual filesystem; the
    /// payload is its virtual path.
    Data(String),

    /// A compiled native module, extracted and patched; the payload is a
    /// real filesystem path the host loader can hand to the OS.
    Native(PathBuf),
}

/// Capability interface for one resolver in the chain.
pub trait Resolve: Send + Sync {
    /// Resolve a logical dotted-or-slash name, with optional search path
    /// hints from the host's import machinery.
    ///
    /// `Ok(None)` means "not applicable here": the chain moves on and the
    /// host runtime eventually falls back to its normal resolution.
    fn try_resolve(
        &self,
        name: &str,
        path_hints: Option<&[PathBuf]>,
    ) -> Result<Option<ResolvedTarget>, ResolveError>;
}

/// Ordered list of resolvers; the first `Some` answer wins.
#[derive(Default)]
pub struct ResolverChain {
    resolvers: Vec<Box<dyn Resolve>>,
}

impl ResolverChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver at the end of the chain.
    pub fn push(&mut self, resolver: Box<dyn Resolve>) {
        self.resolvers.push(resolver);
    }

    /// Ask each resolver in order.
    pub fn resolve(
        &self,
        name: &str,
        path_hints: Option<&[PathBuf]>,
    ) -> Result<Option<ResolvedTarget>, ResolveError> {
        for resolver in &self.resolvers {
            if let Some(target) = resolver.try_resolve(name, path_hints)? {
                return Ok(Some(target));
            }
        }
        Ok(None)
    }
}

/// The archive-backed resolver.
///
/// A logical name maps to an archive path; `<path><ext_suffix>` is a
/// compiled extension and goes through extraction, a bare `<path>` member
/// is a data resource served from the shim without extraction.
pub struct EmbeddedResolver {
    archive: Arc<ArchiveAccessor>,
    cache: Arc<ExtractionCache>,
    ext_suffix: String,
}

impl EmbeddedResolver {
    /// Build a resolver over an opened archive and extraction cache.
    pub fn new(
        archive: Arc<ArchiveAccessor>,
        cache: Arc<ExtractionCache>,
        ext_suffix: &str,
    ) -> Self {
        Self {
            archive,
            cache,
            ext_suffix: ext_suffix.to_string(),
        }
    }

    /// Existence probe: answers without extracting anything.
    pub fn contains(&self, name: &str) -> bool {
        let base = logical_to_path(name);
        self.native_member(&base).is_some() || self.archive.is_file(&base)
    }

    fn native_member(&self, base: &str) -> Option<String> {
        let candidate = format!("{}{}", base, self.ext_suffix);
        self.archive.is_file(&candidate).then_some(candidate)
    }
}

impl Resolve for EmbeddedResolver {
    // path hints do not apply: archive members live at fixed virtual paths
    fn try_resolve(
        &self,
        name: &str,
        _path_hints: Option<&[PathBuf]>,
    ) -> Result<Option<ResolvedTarget>, ResolveError> {
        let base = logical_to_path(name);
        if let Some(member) = self.native_member(&base) {
            // repeated lookups hit the Ready entry; no re-extraction
            let path = self.cache.resolve(&member)?;
            return Ok(Some(ResolvedTarget::Native(path)));
        }
        if self.archive.is_file(&base) {
            return Ok(Some(ResolvedTarget::Data(base)));
        }
        Ok(None)
    }
}

/// Map a logical name to a virtual path: dotted names become slashed
/// paths, slashed names are taken as paths (their dots are literal).
fn logical_to_path(name: &str) -> String {
    if name.contains('/') {
        vpath::normalize(name)
    } else {
        name.replace('.', "/")
    }
}
