//! Resolution, sync, deployment and job supervision for defman
//!
//! This crate sits above the Layer 0 crates and below the CLI and server:
//!
//! ```text
//!          defman-cli   defman-server
//!                \         /
//!               defman-core
//!                /         \
//!         defman-fs     defman-remote
//! ```
//!
//! - **Tier resolution**: [`resolve`] merges [`TierScan`]s into a
//!   [`ResolutionPlan`] by tier, version and source priority
//! - **Remote sync**: [`SyncClient`] refreshes the local cache with
//!   conditional fetches and an atomic directory swap
//! - **Deployment**: [`DeployEngine`] applies plans under a lock with one
//!   backup per batch, verification, a journal and rollback
//! - **Jobs**: [`JobManager`] supervises background work with timeouts,
//!   cancellation and bounded history
//! - **Events**: [`EventSink`] implementations report phase transitions
//!
//! [`DeployService`] wires all of it together.

pub mod autoconfig;
pub mod backup;
pub mod config;
pub mod definition;
pub mod deploy;
pub mod error;
pub mod events;
pub mod jobs;
pub mod journal;
pub mod resolver;
pub mod scan;
pub mod service;
pub mod sync;

pub use autoconfig::{AutoconfigReport, Stack, choose_profile, detect_stacks};
pub use backup::{Backup, BackupEntry, BackupManager, BackupMetadata};
pub use config::{
    AutoconfigConfig, BackupsConfig, ConfigLoader, EngineConfig, JobsConfig, LocksConfig,
    PROJECT_CONFIG_FILE, PathsConfig, Profile, ResolvedPaths, SyncSource,
};
pub use definition::{DefinitionRecord, SourceRef, Tier, parse_version};
pub use deploy::{DeployEngine, DeployResult, RecoveredTransaction};
pub use error::{Error, ErrorKind, Result};
pub use events::{
    BroadcastSink, EventSink, FanoutSink, MemorySink, NullSink, Stage, StatusEvent, TracingSink,
};
pub use jobs::{
    DeploymentJob, JobContext, JobFilter, JobId, JobKind, JobManager, JobSpec, JobStatus,
};
pub use journal::{Journal, JournalEntry, JournalEvent, JournalWrite};
pub use resolver::{Conflict, ResolutionPlan, precedence, resolve};
pub use scan::{SkippedFile, TierScan, scan_dir};
pub use service::{DeployService, DeployServiceBuilder, SYNC_TARGET};
pub use sync::{SyncClient, SyncResult};
