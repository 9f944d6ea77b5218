//! Shared test fixtures for the defman workspace.
//!
//! A dev-dependency only, never published.
//!
//! - [`tree`]: [`TestTree`], a temporary project with tier directories
//! - [`fs`]: file system doubles ([`RecordingFs`], [`FaultyFs`])
//! - [`fetch`]: [`StaticFetcher`], an in-memory remote
//! - [`git`]: real git repositories holding definition files

pub mod fetch;
pub mod fs;
pub mod git;
pub mod tree;

pub use fetch::StaticFetcher;
pub use fs::{FaultyFs, FsCall, RecordingFs};
pub use git::{commit_definitions, definitions_repo};
pub use tree::TestTree;

/// Markdown definition with front matter.
pub fn definition(id: &str, version: &str, body: &str) -> String {
    format!("---\nname: {id}\nversion: {version}\n---\n{body}\n")
}
