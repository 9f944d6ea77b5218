//! Shared setup for the scenario tests.

#![allow(dead_code)]

use std::sync::Arc;

use defman_core::{ConfigLoader, DeployService, JobKind, NullSink};
use defman_fs::{FileSystem, LockManager, OsFileSystem};
use defman_remote::Fetcher;
use defman_test_utils::TestTree;

/// A project tree with three project-tier definitions: `a`, `b` and `c`.
pub fn project(extra_config: &str) -> TestTree {
    let tree = TestTree::new();
    tree.write_config(extra_config);
    for id in ["a", "b", "c"] {
        tree.write_definition(&tree.project_dir(), id, "1.0.0", &format!("Definition {id}."));
    }
    tree
}

/// Builder for a service over `tree`, standing in for one process.
pub struct ServiceSetup<'a> {
    tree: &'a TestTree,
    fs: Arc<dyn FileSystem>,
    fetchers: Vec<Arc<dyn Fetcher>>,
    locks: Option<Arc<LockManager>>,
}

impl<'a> ServiceSetup<'a> {
    pub fn new(tree: &'a TestTree) -> Self {
        Self {
            tree,
            fs: Arc::new(OsFileSystem::default()),
            fetchers: Vec::new(),
            locks: None,
        }
    }

    pub fn fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    pub fn locks(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn build(self) -> Arc<DeployService> {
        let config = ConfigLoader::new(self.tree.root())
            .with_global_config_dir(self.tree.path("global"))
            .load()
            .unwrap();
        let mut builder = DeployService::builder(config, self.tree.root())
            .file_system(self.fs)
            .sink(Arc::new(NullSink));
        if let Some(locks) = self.locks {
            builder = builder.locks(locks);
        }
        for fetcher in self.fetchers {
            builder = builder.fetcher(fetcher);
        }
        Arc::new(builder.build().unwrap())
    }
}

pub fn service(tree: &TestTree) -> Arc<DeployService> {
    ServiceSetup::new(tree).build()
}

/// Deploy outside the job manager, the way a direct library caller would.
pub fn deploy_now(service: &DeployService, ids: &[&str]) -> defman_core::Result<defman_core::DeployResult> {
    let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    service.deploy(&ids, None, &service.detached_context(JobKind::Deploy))
}
