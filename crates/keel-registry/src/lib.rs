//! Registry access, dependency resolution, and the local source store.
//!
//! Three collaborating pieces:
//! - [`client`]/[`http`] — logical registry operations (`search`,
//!   `versions`, `manifest`, `fetch`) over a filesystem or HTTP backend;
//! - [`resolve`] — backtracking semantic-version resolution from a root
//!   manifest to a pinned, deduplicated, acyclic [`ResolutionSet`];
//! - [`store`] — a content-addressed directory of unpacked package sources
//!   keyed by `(name, version)`, with rename-as-commit atomicity.

pub mod cancel;
pub mod client;
pub mod error;
pub mod http;
pub mod resolve;
pub mod store;
pub mod tree;
pub mod version;

pub use cancel::CancelToken;
pub use client::{LocalRegistry, Registry, SearchHit};
pub use error::{RegistryError, Result};
pub use http::{HttpConfig, HttpRegistry, RetryPolicy};
pub use resolve::{resolve, Origin, ResolutionSet, ResolveOptions, ResolvedPackage};
pub use store::SourceStore;
pub use tree::{format_flat, format_tree};
