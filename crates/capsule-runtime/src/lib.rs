//! Capsule Runtime Loader
//!
//! Makes native libraries embedded in the executable's trailing archive
//! loadable by the OS dynamic linker:
//! - **extract**: single-flight extraction cache; copies a member to a
//!   process-private scratch directory, rewrites its runtime search path
//!   to `$ORIGIN` in place, and recursively extracts every bundled
//!   dependency into the same directory
//! - **resolve**: the hook a host runtime's import machinery calls; an
//!   ordered chain of resolvers, with the embedded-archive resolver as
//!   one implementation among others
//! - **context**: the long-lived loader context owning the archive
//!   accessor, the virtual filesystem shim, and the extraction cache

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod context;
pub mod extract;
pub mod resolve;

pub use context::LoaderContext;
pub use extract::{ExtractError, ExtractionCache, MAX_CHAIN_DEPTH, REWRITE_TOKEN};
pub use resolve::{EmbeddedResolver, Resolve, ResolveError, ResolvedTarget, ResolverChain};
