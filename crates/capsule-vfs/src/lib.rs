//! Archive Access and Virtual Filesystem
//!
//! Serves file-like access to members of the zip archive appended to the
//! running executable:
//! - **archive**: member index, memoized stat/listing queries, member reads
//! - **vfs**: path translation and POSIX-like primitives (`stat`, `open`,
//!   `list`, `exists`, `isDirectory`) over the archive, read-only
//! - **path**: lexical normalization of virtual paths
//!
//! The archive is immutable for the lifetime of the process, so every
//! lookup result is cacheable unconditionally.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod archive;
pub mod path;
pub mod vfs;

pub use archive::{ArchiveAccessor, ArchiveError, MemberInfo};
pub use vfs::{OpenMode, StatResult, VfsError, VirtualFs};
