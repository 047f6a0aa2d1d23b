//! Archive accessor: the zip appended to the running executable.
//!
//! The zip central directory is located by the reader regardless of the
//! launcher bytes preceding it, so the whole composite executable can be
//! opened as an archive directly. The member-name index is built once at
//! open time and never changes; stat and listing answers are memoized for
//! the process lifetime.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use parking_lot::Mutex;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::path::normalize;

/// Errors from archive member access.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The trailing bytes of the executable are not a zip archive.
    ///
    /// The process is running unpacked; callers must treat every lookup as
    /// "not applicable" rather than failing.
    #[error("no archive appended to executable")]
    NotAnArchive,

    /// No member with the given virtual path exists.
    #[error("member not found: {0}")]
    NotFound(String),

    /// A listing was requested on a path that is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// I/O error while reading the executable.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive itself is damaged or uses an unsupported feature.
    #[error("archive error: {0}")]
    Zip(ZipError),
}

/// Synthesized metadata for one archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberInfo {
    /// Decompressed size in bytes (0 for directories).
    pub size: u64,
    /// Whether the path names a directory prefix rather than a file member.
    pub is_dir: bool,
}

/// Read-only random access to the archive trailing the executable.
///
/// One instance lives for the whole process; all mutable state is the
/// memoization of lookups, guarded by per-map mutexes.
pub struct ArchiveAccessor {
    zip: Mutex<ZipArchive<File>>,
    names: Vec<String>,
    index: HashSet<String>,
    // memoized (operation, path) answers; sound because the archive is
    // immutable once the process has started
    paths: Mutex<HashMap<String, Option<(String, bool)>>>,
    stats: Mutex<HashMap<String, MemberInfo>>,
    listings: Mutex<HashMap<String, Vec<String>>>,
}

impl ArchiveAccessor {
    /// Open the archive inside the given executable.
    ///
    /// Fails with [`ArchiveError::NotAnArchive`] when no zip central
    /// directory is present (the process is running unpacked).
    pub fn open(exe_path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(exe_path)?;
        let zip = ZipArchive::new(file).map_err(|e| match e {
            ZipError::Io(err) => ArchiveError::Io(err),
            _ => ArchiveError::NotAnArchive,
        })?;
        let names: Vec<String> = zip.file_names().map(str::to_string).collect();
        let index: HashSet<String> = names.iter().cloned().collect();
        Ok(Self {
            zip: Mutex::new(zip),
            names,
            index,
            paths: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            listings: Mutex::new(HashMap::new()),
        })
    }

    /// All member names, in archive order.
    pub fn member_names(&self) -> &[String] {
        &self.names
    }

    /// Whether a file member or directory prefix exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.locate(&normalize(path)).is_some()
    }

    /// Whether `path` names a file member (not a directory prefix).
    pub fn is_file(&self, path: &str) -> bool {
        matches!(self.locate(&normalize(path)), Some((_, false)))
    }

    /// Whether `path` names a directory.
    ///
    /// A path is a directory iff an explicit `path/` member is stored or
    /// some member name starts with `path/`.
    pub fn is_directory(&self, path: &str) -> bool {
        matches!(self.locate(&normalize(path)), Some((_, true)))
    }

    /// Size and type of the member at `path`.
    pub fn metadata(&self, path: &str) -> Result<MemberInfo, ArchiveError> {
        let key = normalize(path);
        if let Some(info) = self.stats.lock().get(&key) {
            return Ok(*info);
        }
        let (member, is_dir) = self
            .locate(&key)
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;
        let info = if is_dir {
            MemberInfo { size: 0, is_dir: true }
        } else {
            let mut zip = self.zip.lock();
            let entry = zip.by_name(&member).map_err(|e| map_zip(e, path))?;
            MemberInfo {
                size: entry.size(),
                is_dir: false,
            }
        };
        self.stats.lock().insert(key, info);
        Ok(info)
    }

    /// Ordered set of immediate child names under the directory `path`.
    pub fn list(&self, path: &str) -> Result<Vec<String>, ArchiveError> {
        let key = normalize(path);
        if let Some(children) = self.listings.lock().get(&key) {
            return Ok(children.clone());
        }
        match self.locate(&key) {
            None => return Err(ArchiveError::NotFound(path.to_string())),
            Some((_, false)) => return Err(ArchiveError::NotADirectory(path.to_string())),
            Some((_, true)) => {}
        }
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key)
        };
        let mut children = BTreeSet::new();
        for name in &self.names {
            if name.len() > prefix.len() && name.starts_with(&prefix) {
                if let Some(child) = name[prefix.len()..].split('/').next() {
                    if !child.is_empty() {
                        children.insert(child.to_string());
                    }
                }
            }
        }
        let out: Vec<String> = children.into_iter().collect();
        self.listings.lock().insert(key, out.clone());
        Ok(out)
    }

    /// Decompressed bytes of the file member at `path`.
    pub fn read(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let key = normalize(path);
        let (member, is_dir) = self
            .locate(&key)
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;
        if is_dir {
            return Err(ArchiveError::NotFound(path.to_string()));
        }
        let mut zip = self.zip.lock();
        let mut entry = zip.by_name(&member).map_err(|e| map_zip(e, path))?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Random-access byte stream over the decompressed member.
    pub fn open_for_read(&self, path: &str) -> Result<Cursor<Vec<u8>>, ArchiveError> {
        Ok(Cursor::new(self.read(path)?))
    }

    /// Resolve a normalized path to its stored member name and type.
    ///
    /// Probes the exact name first, then the `path/` directory form, then
    /// the implicit-directory prefix scan. Memoized.
    fn locate(&self, path: &str) -> Option<(String, bool)> {
        if let Some(hit) = self.paths.lock().get(path) {
            return hit.clone();
        }
        let result = self.locate_uncached(path);
        self.paths.lock().insert(path.to_string(), result.clone());
        result
    }

    fn locate_uncached(&self, path: &str) -> Option<(String, bool)> {
        if path.is_empty() {
            // archive root
            return (!self.names.is_empty()).then(|| (String::new(), true));
        }
        if self.index.contains(path) {
            return Some((path.to_string(), false));
        }
        let dir_form = format!("{}/", path);
        if self.index.contains(&dir_form) {
            return Some((dir_form, true));
        }
        if self.names.iter().any(|n| n.starts_with(&dir_form)) {
            return Some((dir_form, true));
        }
        None
    }
}

fn map_zip(err: ZipError, path: &str) -> ArchiveError {
    match err {
        ZipError::Io(io) => ArchiveError::Io(io),
        ZipError::FileNotFound => ArchiveError::NotFound(path.to_string()),
        other => ArchiveError::Zip(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(members: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // launcher stand-in before the archive
        file.write_all(b"#!/fake/launcher\n").unwrap();
        file.write_all(&[0u8; 256]).unwrap();
        let mut zip = zip::ZipWriter::new(file.as_file_mut());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        file
    }

    #[test]
    fn test_open_rejects_plain_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"just a plain executable").unwrap();
        assert!(matches!(
            ArchiveAccessor::open(file.path()),
            Err(ArchiveError::NotAnArchive)
        ));
    }

    #[test]
    fn test_exists_and_is_directory() {
        let file = fixture(&[("pkg/a", b"aa"), ("pkg/sub/c", b"cc")]);
        let archive = ArchiveAccessor::open(file.path()).unwrap();

        assert!(archive.exists("pkg/a"));
        assert!(archive.is_file("pkg/a"));
        assert!(!archive.is_directory("pkg/a"));

        assert!(archive.exists("pkg"));
        assert!(archive.is_directory("pkg"));
        assert!(archive.is_directory("pkg/sub"));
        assert!(!archive.exists("pkg/missing"));
    }

    #[test]
    fn test_list_immediate_children() {
        let file = fixture(&[("pkg/a", b"1"), ("pkg/b", b"2"), ("pkg/sub/c", b"3")]);
        let archive = ArchiveAccessor::open(file.path()).unwrap();
        assert_eq!(archive.list("pkg").unwrap(), vec!["a", "b", "sub"]);
        // repeated call comes from the memo
        assert_eq!(archive.list("pkg").unwrap(), vec!["a", "b", "sub"]);
    }

    #[test]
    fn test_list_root() {
        let file = fixture(&[("top.txt", b"x"), ("pkg/a", b"1")]);
        let archive = ArchiveAccessor::open(file.path()).unwrap();
        assert_eq!(archive.list("").unwrap(), vec!["pkg", "top.txt"]);
    }

    #[test]
    fn test_list_on_file_fails() {
        let file = fixture(&[("pkg/a", b"1")]);
        let archive = ArchiveAccessor::open(file.path()).unwrap();
        assert!(matches!(
            archive.list("pkg/a"),
            Err(ArchiveError::NotADirectory(_))
        ));
        assert!(matches!(
            archive.list("nope"),
            Err(ArchiveError::NotFound(_))
        ));
    }

    #[test]
    fn test_metadata_and_read() {
        let file = fixture(&[("pkg/data.bin", b"hello capsule")]);
        let archive = ArchiveAccessor::open(file.path()).unwrap();

        let info = archive.metadata("pkg/data.bin").unwrap();
        assert_eq!(info.size, 13);
        assert!(!info.is_dir);

        let dir = archive.metadata("pkg").unwrap();
        assert!(dir.is_dir);

        assert_eq!(archive.read("pkg/data.bin").unwrap(), b"hello capsule");
        assert!(matches!(
            archive.read("pkg/none"),
            Err(ArchiveError::NotFound(_))
        ));
    }
}
