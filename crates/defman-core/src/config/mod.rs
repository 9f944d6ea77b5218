//! Engine configuration
//!
//! [`EngineConfig`] is the typed form of `defman.toml`. [`ConfigLoader`]
//! layers the user-global file under the project file.

mod engine;
mod loader;

pub use engine::{
    AutoconfigConfig, BackupsConfig, EngineConfig, JobsConfig, LocksConfig, PathsConfig,
    Profile, ResolvedPaths, SyncSource,
};
pub use loader::{ConfigLoader, PROJECT_CONFIG_FILE};
