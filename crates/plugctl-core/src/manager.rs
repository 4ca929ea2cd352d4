//! `ComponentManager` owns the collaborators every lifecycle operation
//! needs and serializes those operations behind one lock. A file-backed
//! manager also takes an advisory lock on `<data_dir>/plugctl.lock`, so
//! operations from separate processes on one project do not interleave.
//!
//! The orchestrators themselves live in `register`, `remove`, `reregister`
//! and `startup`; each public entry point takes the lock once and then
//! works through `*_locked` helpers so that compound operations
//! (re-registration is removal followed by registration) stay atomic.

use crate::config::{Config, DeploymentProfile};
use crate::deploy::{ComponentDeployer, ProvisioningDeployer};
use crate::error::{ComponentError, Result};
use crate::io;
use crate::paths::{
    NODES_FILE, OPERATION_LOCK_FILE, PIPELINES_FILE, RECORDS_FILE, SERVICES_FILE, STREAMING_FILE,
};
use crate::pipeline::{CatalogStore, PipelineElementStore};
use crate::placement::{
    CatalogNodeManager, CatalogStreamingRegistry, NodeServiceManager, StreamingServiceRegistry,
};
use crate::process::CancelToken;
use crate::record::RecordStore;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Where uploaded packages live.
    pub upload_dir: PathBuf,
    /// Where packages are extracted and unmanaged descriptors are written.
    pub plugin_dir: PathBuf,
    pub profile: DeploymentProfile,
}

/// The collaborators a [`ComponentManager`] drives.
pub struct Collaborators {
    pub pipelines: Arc<dyn PipelineElementStore>,
    pub nodes: Arc<dyn NodeServiceManager>,
    pub streaming: Arc<dyn StreamingServiceRegistry>,
    pub deployer: Arc<dyn ComponentDeployer>,
    pub records: Arc<RecordStore>,
}

pub struct ComponentManager {
    pub(crate) pipelines: Arc<dyn PipelineElementStore>,
    pub(crate) nodes: Arc<dyn NodeServiceManager>,
    pub(crate) streaming: Arc<dyn StreamingServiceRegistry>,
    pub(crate) deployer: Arc<dyn ComponentDeployer>,
    pub(crate) records: Arc<RecordStore>,
    pub(crate) settings: ManagerSettings,
    lock: Mutex<()>,
    lock_file: Option<PathBuf>,
}

/// Held for the duration of one lifecycle operation.
pub(crate) struct OperationGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _file: Option<File>,
}

impl ComponentManager {
    pub fn new(collaborators: Collaborators, settings: ManagerSettings) -> Self {
        Self {
            pipelines: collaborators.pipelines,
            nodes: collaborators.nodes,
            streaming: collaborators.streaming,
            deployer: collaborators.deployer,
            records: collaborators.records,
            settings,
            lock: Mutex::new(()),
            lock_file: None,
        }
    }

    /// File-backed manager for the project at `root`: state lives under the
    /// configured data directory, deployment goes through the provisioning
    /// tool.
    pub fn open(root: &Path, config: &Config, cancel: CancelToken) -> Result<Self> {
        let paths = config.resolve_paths(root);
        io::ensure_dir(&paths.data_dir)?;
        io::ensure_dir(&paths.upload_dir)?;
        io::ensure_dir(&paths.plugin_dir)?;

        let collaborators = Collaborators {
            pipelines: Arc::new(CatalogStore::open(&paths.data_file(PIPELINES_FILE))?),
            nodes: Arc::new(CatalogNodeManager::open(
                &paths.data_file(SERVICES_FILE),
                &paths.data_file(NODES_FILE),
            )?),
            streaming: Arc::new(CatalogStreamingRegistry::open(&paths.data_file(STREAMING_FILE))?),
            deployer: Arc::new(ProvisioningDeployer::new(&config.provisioning, root, cancel)),
            records: Arc::new(RecordStore::open(&paths.data_file(RECORDS_FILE))?),
        };
        let lock_file = paths.data_file(OPERATION_LOCK_FILE);
        let settings = ManagerSettings {
            upload_dir: paths.upload_dir,
            plugin_dir: paths.plugin_dir,
            profile: config.profile,
        };
        Ok(Self {
            lock_file: Some(lock_file),
            ..Self::new(collaborators, settings)
        })
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub(crate) fn guard(&self) -> Result<OperationGuard<'_>> {
        let local = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = self.lock_file.as_deref().map(io::lock_exclusive).transpose()?;
        Ok(OperationGuard {
            _local: local,
            _file: file,
        })
    }

    pub(crate) fn require_managed_support(&self) -> Result<()> {
        match self.settings.profile {
            DeploymentProfile::Standard => Ok(()),
            DeploymentProfile::Container => Err(ComponentError::ManagedComponentUnsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::component;
    use tempfile::TempDir;

    #[test]
    fn managers_on_one_project_share_state() {
        let root = TempDir::new().unwrap();
        let config = Config::default();
        let first = ComponentManager::open(root.path(), &config, CancelToken::new()).unwrap();
        let second = ComponentManager::open(root.path(), &config, CancelToken::new()).unwrap();

        first
            .register_unmanaged_component(&component("Alpha", "AlphaAlgo"))
            .unwrap();
        second
            .register_unmanaged_component(&component("Beta", "BetaAlgo"))
            .unwrap();

        assert_eq!(first.records().all().len(), 2);
        let reopened = ComponentManager::open(root.path(), &config, CancelToken::new()).unwrap();
        assert!(reopened.records().by_name("Alpha").is_some());
        assert!(reopened.records().by_name("Beta").is_some());
        assert!(root.path().join(".plugctl").join(OPERATION_LOCK_FILE).exists());
    }

    #[test]
    fn operation_lock_excludes_other_managers() {
        let root = TempDir::new().unwrap();
        let config = Config::default();
        let first = ComponentManager::open(root.path(), &config, CancelToken::new()).unwrap();
        let second = ComponentManager::open(root.path(), &config, CancelToken::new()).unwrap();

        let held = first.guard().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = std::thread::spawn(move || {
            let _guard = second.guard().unwrap();
            tx.send(()).unwrap();
        });
        assert!(rx
            .recv_timeout(std::time::Duration::from_millis(200))
            .is_err());
        drop(held);
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
