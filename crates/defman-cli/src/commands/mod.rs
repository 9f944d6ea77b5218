//! Command implementations for defman-cli

pub mod backups;
pub mod deploy;
pub mod jobs;
pub mod recover;
pub mod resolve;
pub mod sync;

pub use backups::{run_backups_list, run_backups_prune};
pub use deploy::{run_autoconfig, run_deploy};
pub use jobs::{run_cancel, run_status};
pub use recover::run_recover;
pub use resolve::run_resolve;
pub use sync::run_sync;
