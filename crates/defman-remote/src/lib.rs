//! Remote transports for defman definition sources
//!
//! A [`Fetcher`] performs one conditional fetch of a source's complete
//! artifact set. Transports never touch the local cache; writing, locking
//! and etag bookkeeping belong to the sync client in `defman-core`.
//!
//! - [`HttpFetcher`]: a JSON bundle served over HTTP, conditional on `ETag`
//! - [`GitFetcher`]: `*.md` files at a git remote's HEAD, conditional on the
//!   HEAD commit id

pub mod error;
pub mod fetcher;
pub mod git;
pub mod http;

pub use error::{Error, Result};
pub use fetcher::{FetchRequest, FetchResponse, Fetcher, RemoteArtifact, SourceKind};
pub use git::GitFetcher;
pub use http::{BundleEntry, HttpFetcher, RemoteBundle};
