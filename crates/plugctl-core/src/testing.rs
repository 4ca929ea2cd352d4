//! In-memory collaborators and fixtures shared by the orchestrator tests.

use crate::archive::tests::write_package;
use crate::config::DeploymentProfile;
use crate::deploy::ComponentDeployer;
use crate::descriptor::{
    ActionSpec, AlgorithmSpec, ComponentDescriptor, PipelineSpec, ProvidesCollection,
    RequiresCollection, TaskSpec,
};
use crate::error::{ComponentError, Result};
use crate::manager::{Collaborators, ComponentManager, ManagerSettings};
use crate::paths;
use crate::pipeline::{
    ActionDef, AlgorithmDef, CatalogStore, PipelineCatalog, PipelineDef, PipelineElementStore,
    TaskDef,
};
use crate::placement::{CatalogNodeManager, CatalogStreamingRegistry, NodeModel};
use crate::record::RecordStore;
use crate::types::ActionType;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// A C++ batch component with one algorithm and no custom elements.
pub(crate) fn component(name: &str, algorithm: &str) -> ComponentDescriptor {
    ComponentDescriptor {
        component_name: name.to_string(),
        component_version: Some("1.0".to_string()),
        middleware_version: Some("1.0".to_string()),
        source_language: Some("c++".to_string()),
        batch_library: Some(format!("${{PLUGIN_HOME}}/plugins/{name}/lib/lib{name}.so")),
        environment_variables: Some(Vec::new()),
        algorithm: Some(AlgorithmSpec {
            name: algorithm.to_string(),
            description: format!("{algorithm} detection"),
            action_type: Some(ActionType::Detection),
            requires_collection: Some(RequiresCollection {
                states: Some(Vec::new()),
            }),
            provides_collection: Some(ProvidesCollection {
                states: Some(vec!["DETECTION".to_string()]),
                properties: Some(Vec::new()),
            }),
        }),
        ..ComponentDescriptor::default()
    }
}

/// An extras descriptor: one action on `algorithm`, one task, one pipeline.
pub(crate) fn dependent(name: &str, algorithm: &str) -> ComponentDescriptor {
    let upper = name.to_uppercase();
    ComponentDescriptor {
        component_name: name.to_string(),
        actions: vec![ActionSpec {
            name: format!("{upper} ACTION"),
            description: "custom action".to_string(),
            algorithm: algorithm.to_string(),
            properties: Some(Vec::new()),
        }],
        tasks: vec![TaskSpec {
            name: format!("{upper} TASK"),
            description: "custom task".to_string(),
            actions: vec![format!("{upper} ACTION")],
        }],
        pipelines: vec![PipelineSpec {
            name: format!("{upper} PIPELINE"),
            description: "custom pipeline".to_string(),
            tasks: vec![format!("{upper} TASK")],
        }],
        ..ComponentDescriptor::default()
    }
}

// ---------------------------------------------------------------------------
// FakeDeployer
// ---------------------------------------------------------------------------

/// Pretends packages named `<TLD>.tar.gz` were extracted to
/// `<plugin_dir>/<TLD>`; the descriptor must already be there.
pub(crate) struct FakeDeployer {
    plugin_dir: PathBuf,
    pub fail_deploy: AtomicBool,
    pub fail_undeploy: AtomicBool,
    deploys: Mutex<Vec<String>>,
    undeploys: Mutex<Vec<String>>,
}

impl FakeDeployer {
    pub(crate) fn new(plugin_dir: &Path) -> Self {
        Self {
            plugin_dir: plugin_dir.to_path_buf(),
            fail_deploy: AtomicBool::new(false),
            fail_undeploy: AtomicBool::new(false),
            deploys: Mutex::new(Vec::new()),
            undeploys: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn deploy_calls(&self) -> Vec<String> {
        self.deploys.lock().unwrap().clone()
    }

    pub(crate) fn undeploy_calls(&self) -> Vec<String> {
        self.undeploys.lock().unwrap().clone()
    }
}

impl ComponentDeployer for FakeDeployer {
    fn deploy(&self, package_file_name: &str) -> Result<PathBuf> {
        self.deploys.lock().unwrap().push(package_file_name.to_string());
        if self.fail_deploy.load(Ordering::SeqCst) {
            return Err(ComponentError::DeploymentFailed("scripted failure".to_string()));
        }
        let tld = package_file_name.trim_end_matches(paths::PACKAGE_EXTENSION);
        let path = paths::descriptor_path(&self.plugin_dir, tld);
        if !path.exists() {
            return Err(ComponentError::DeploymentFailed(format!(
                "nothing staged for {package_file_name}"
            )));
        }
        Ok(path)
    }

    fn undeploy(&self, top_level_dir: &str) -> Result<()> {
        self.undeploys.lock().unwrap().push(top_level_dir.to_string());
        if self.fail_undeploy.load(Ordering::SeqCst) {
            return Err(ComponentError::DeploymentUnreachable);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingStore
// ---------------------------------------------------------------------------

/// Pipeline store that logs every write and can be told to reject
/// algorithm saves.
pub(crate) struct RecordingStore {
    inner: CatalogStore,
    pub fail_algorithm_save: AtomicBool,
    writes: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: CatalogStore::in_memory(PipelineCatalog::seeded()),
            fail_algorithm_save: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    /// Number of writes whose label starts with `prefix`, e.g. `"save_action"`.
    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.writes().iter().filter(|w| w.starts_with(prefix)).count()
    }

    fn log(&self, what: &str, name: &str) {
        self.writes.lock().unwrap().push(format!("{what}:{name}"));
    }
}

impl PipelineElementStore for RecordingStore {
    fn save_algorithm(&self, algorithm: &AlgorithmDef) -> Result<()> {
        self.log("save_algorithm", &algorithm.name);
        if self.fail_algorithm_save.load(Ordering::SeqCst) {
            return Err(ComponentError::Subsystem("scripted algorithm save failure".to_string()));
        }
        self.inner.save_algorithm(algorithm)
    }

    fn save_action(&self, action: &ActionDef) -> Result<()> {
        self.log("save_action", &action.name);
        self.inner.save_action(action)
    }

    fn save_task(&self, task: &TaskDef) -> Result<()> {
        self.log("save_task", &task.name);
        self.inner.save_task(task)
    }

    fn save_pipeline(&self, pipeline: &PipelineDef) -> Result<()> {
        self.log("save_pipeline", &pipeline.name);
        self.inner.save_pipeline(pipeline)
    }

    fn delete_algorithm(&self, name: &str) -> Result<()> {
        self.log("delete_algorithm", name);
        self.inner.delete_algorithm(name)
    }

    fn delete_action(&self, name: &str) -> Result<()> {
        self.log("delete_action", name);
        self.inner.delete_action(name)
    }

    fn delete_task(&self, name: &str) -> Result<()> {
        self.log("delete_task", name);
        self.inner.delete_task(name)
    }

    fn delete_pipeline(&self, name: &str) -> Result<()> {
        self.log("delete_pipeline", name);
        self.inner.delete_pipeline(name)
    }

    fn algorithm_names(&self) -> Result<BTreeSet<String>> {
        self.inner.algorithm_names()
    }

    fn action_names(&self) -> Result<BTreeSet<String>> {
        self.inner.action_names()
    }

    fn task_names(&self) -> Result<BTreeSet<String>> {
        self.inner.task_names()
    }

    fn pipeline_names(&self) -> Result<BTreeSet<String>> {
        self.inner.pipeline_names()
    }

    fn algorithm(&self, name: &str) -> Result<Option<AlgorithmDef>> {
        self.inner.algorithm(name)
    }

    fn action(&self, name: &str) -> Result<Option<ActionDef>> {
        self.inner.action(name)
    }

    fn task(&self, name: &str) -> Result<Option<TaskDef>> {
        self.inner.task(name)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub(crate) struct Harness {
    pub dir: TempDir,
    pub manager: ComponentManager,
    pub store: Arc<RecordingStore>,
    pub nodes: Arc<CatalogNodeManager>,
    pub streaming: Arc<CatalogStreamingRegistry>,
    pub deployer: Arc<FakeDeployer>,
    pub records: Arc<RecordStore>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::build(Vec::new(), DeploymentProfile::Standard)
    }

    pub(crate) fn with_nodes(nodes: Vec<NodeModel>) -> Self {
        Self::build(nodes, DeploymentProfile::Standard)
    }

    pub(crate) fn container() -> Self {
        Self::build(Vec::new(), DeploymentProfile::Container)
    }

    fn build(nodes: Vec<NodeModel>, profile: DeploymentProfile) -> Self {
        let dir = TempDir::new().unwrap();
        let upload_dir = dir.path().join("uploads");
        let plugin_dir = dir.path().join("plugins");
        std::fs::create_dir_all(&upload_dir).unwrap();
        std::fs::create_dir_all(&plugin_dir).unwrap();

        let store = Arc::new(RecordingStore::new());
        let nodes = Arc::new(CatalogNodeManager::in_memory(nodes));
        let streaming = Arc::new(CatalogStreamingRegistry::in_memory());
        let deployer = Arc::new(FakeDeployer::new(&plugin_dir));
        let records = Arc::new(RecordStore::in_memory());

        let manager = ComponentManager::new(
            Collaborators {
                pipelines: store.clone(),
                nodes: nodes.clone(),
                streaming: streaming.clone(),
                deployer: deployer.clone(),
                records: records.clone(),
            },
            ManagerSettings {
                upload_dir,
                plugin_dir,
                profile,
            },
        );
        Self {
            dir,
            manager,
            store,
            nodes,
            streaming,
            deployer,
            records,
        }
    }

    pub(crate) fn upload_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub(crate) fn plugin_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    /// Write `<name>.tar.gz` into the upload area and its extracted
    /// descriptor into the plugin area, without creating a record.
    pub(crate) fn write_package(&self, descriptor: &ComponentDescriptor) -> PathBuf {
        self.write_package_as(&descriptor.component_name, descriptor)
    }

    /// Like `write_package`, but the package and its top-level directory
    /// are named `tld` instead of after the component.
    pub(crate) fn write_package_as(&self, tld: &str, descriptor: &ComponentDescriptor) -> PathBuf {
        let json = descriptor.to_json().unwrap();
        let pkg_path = self.upload_dir().join(format!("{tld}{}", paths::PACKAGE_EXTENSION));
        write_package(&pkg_path, tld, &json);
        let path = paths::descriptor_path(&self.plugin_dir(), tld);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, json).unwrap();
        pkg_path
    }

    /// Write an extracted descriptor at `<plugin_dir>/<name>/descriptor/descriptor.json`.
    pub(crate) fn write_descriptor(&self, descriptor: &ComponentDescriptor) -> PathBuf {
        let path = paths::descriptor_path(&self.plugin_dir(), &descriptor.component_name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, descriptor.to_json().unwrap()).unwrap();
        path
    }

    /// An uploaded package with an `UPLOADED` record; returns its file name.
    pub(crate) fn stage_package(&self, descriptor: &ComponentDescriptor) -> String {
        self.stage_package_as(&descriptor.component_name, descriptor)
    }

    pub(crate) fn stage_package_as(&self, tld: &str, descriptor: &ComponentDescriptor) -> String {
        let pkg_path = self.write_package_as(tld, descriptor);
        self.records.add_uploaded(&pkg_path).unwrap();
        paths::file_name(&pkg_path).unwrap()
    }
}
