//! Pipeline graph elements and the store that owns them.
//!
//! Element names are case-insensitive; every name and reference is stored
//! upper-cased.

use crate::descriptor::ComponentDescriptor;
use crate::error::{ComponentError, Result};
use crate::state::JsonState;
use crate::types::{ActionType, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Markup elements that ship with every installation.
pub const BUILTIN_MARKUP_ALGORITHM: &str = "MARKUPCV";
pub const BUILTIN_MARKUP_ACTION: &str = "OCV GENERIC MARKUP ACTION";
pub const BUILTIN_MARKUP_TASK: &str = "OCV GENERIC MARKUP TASK";

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmDef {
    pub name: String,
    pub description: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub requires_states: Vec<String>,
    #[serde(default)]
    pub provides_states: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    pub supports_batch: bool,
    pub supports_stream: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub description: String,
    pub value_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: String,
    pub description: String,
    pub algorithm: String,
    #[serde(default)]
    pub properties: Vec<PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    pub description: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
    pub name: String,
    pub description: String,
    pub tasks: Vec<String>,
}

impl AlgorithmDef {
    pub fn property_names(&self) -> BTreeSet<String> {
        self.properties.iter().map(|p| p.name.to_uppercase()).collect()
    }

    pub fn default_action_name(&self) -> String {
        format!("{} {} ACTION", self.name, self.action_type)
    }

    pub fn default_task_name(&self) -> String {
        format!("{} {} TASK", self.name, self.action_type)
    }

    pub fn default_pipeline_name(&self) -> String {
        format!("{} {} PIPELINE", self.name, self.action_type)
    }
}

// ---------------------------------------------------------------------------
// ElementPlan
// ---------------------------------------------------------------------------

/// Everything a descriptor contributes to the pipeline store, in save order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementPlan {
    pub algorithm: Option<AlgorithmDef>,
    pub actions: Vec<ActionDef>,
    pub tasks: Vec<TaskDef>,
    pub pipelines: Vec<PipelineDef>,
}

impl ElementPlan {
    /// Convert a descriptor into store definitions. A kind left empty by an
    /// algorithm descriptor gets one default element; the default pipeline
    /// is skipped when the algorithm needs states produced by an earlier stage.
    pub fn from_descriptor(descriptor: &ComponentDescriptor) -> Self {
        let algorithm = descriptor.algorithm.as_ref().map(|spec| AlgorithmDef {
            name: spec.name.to_uppercase(),
            description: spec.description.clone(),
            action_type: spec.action_type.unwrap_or(ActionType::Detection),
            requires_states: spec.required_states().to_vec(),
            provides_states: spec
                .provides_collection
                .as_ref()
                .and_then(|p| p.states.clone())
                .unwrap_or_default(),
            properties: spec
                .provides_collection
                .as_ref()
                .and_then(|p| p.properties.as_ref())
                .map(|props| {
                    props
                        .iter()
                        .map(|p| PropertyDef {
                            name: p.name.to_uppercase(),
                            description: p.description.clone(),
                            value_type: p.value_type,
                            default_value: p.default_value.clone(),
                            properties_key: p.properties_key.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            supports_batch: descriptor.supports_batch(),
            supports_stream: descriptor.supports_stream(),
        });

        let actions = if descriptor.actions.is_empty() {
            algorithm
                .iter()
                .map(|algo| ActionDef {
                    name: algo.default_action_name(),
                    description: format!("Default action for the {} algorithm.", algo.name),
                    algorithm: algo.name.clone(),
                    properties: Vec::new(),
                })
                .collect()
        } else {
            descriptor
                .actions
                .iter()
                .map(|a| ActionDef {
                    name: a.name.to_uppercase(),
                    description: a.description.clone(),
                    algorithm: a.algorithm.to_uppercase(),
                    properties: a
                        .properties
                        .iter()
                        .flatten()
                        .map(|p| PropertyValue {
                            name: p.name.to_uppercase(),
                            value: p.value.clone().unwrap_or_default(),
                        })
                        .collect(),
                })
                .collect()
        };

        let tasks = if descriptor.tasks.is_empty() {
            algorithm
                .iter()
                .map(|algo| TaskDef {
                    name: algo.default_task_name(),
                    description: format!(
                        "Default task for the {} action.",
                        algo.default_action_name()
                    ),
                    actions: vec![algo.default_action_name()],
                })
                .collect()
        } else {
            descriptor
                .tasks
                .iter()
                .map(|t| TaskDef {
                    name: t.name.to_uppercase(),
                    description: t.description.clone(),
                    actions: upper_all(&t.actions),
                })
                .collect()
        };

        let pipelines = if descriptor.pipelines.is_empty() {
            algorithm
                .iter()
                .filter(|algo| algo.requires_states.is_empty())
                .map(|algo| PipelineDef {
                    name: algo.default_pipeline_name(),
                    description: format!(
                        "Default pipeline for the {} task.",
                        algo.default_task_name()
                    ),
                    tasks: vec![algo.default_task_name()],
                })
                .collect()
        } else {
            descriptor
                .pipelines
                .iter()
                .map(|p| PipelineDef {
                    name: p.name.to_uppercase(),
                    description: p.description.clone(),
                    tasks: upper_all(&p.tasks),
                })
                .collect()
        };

        Self {
            algorithm,
            actions,
            tasks,
            pipelines,
        }
    }
}

fn upper_all(names: &[String]) -> Vec<String> {
    names.iter().map(|n| n.to_uppercase()).collect()
}

// ---------------------------------------------------------------------------
// PipelineElementStore
// ---------------------------------------------------------------------------

/// Persistent home of pipeline graph elements.
///
/// Saves fail with [`ComponentError::Subsystem`] when they would break the
/// store's own invariants (duplicate name, dangling reference). Deletes are
/// idempotent and cascade to elements that reference the deleted one.
pub trait PipelineElementStore: Send + Sync {
    fn save_algorithm(&self, algorithm: &AlgorithmDef) -> Result<()>;
    fn save_action(&self, action: &ActionDef) -> Result<()>;
    fn save_task(&self, task: &TaskDef) -> Result<()>;
    fn save_pipeline(&self, pipeline: &PipelineDef) -> Result<()>;

    fn delete_algorithm(&self, name: &str) -> Result<()>;
    fn delete_action(&self, name: &str) -> Result<()>;
    fn delete_task(&self, name: &str) -> Result<()>;
    fn delete_pipeline(&self, name: &str) -> Result<()>;

    fn algorithm_names(&self) -> Result<BTreeSet<String>>;
    fn action_names(&self) -> Result<BTreeSet<String>>;
    fn task_names(&self) -> Result<BTreeSet<String>>;
    fn pipeline_names(&self) -> Result<BTreeSet<String>>;

    fn algorithm(&self, name: &str) -> Result<Option<AlgorithmDef>>;
    fn action(&self, name: &str) -> Result<Option<ActionDef>>;
    fn task(&self, name: &str) -> Result<Option<TaskDef>>;
}

// ---------------------------------------------------------------------------
// PipelineCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineCatalog {
    #[serde(default)]
    pub algorithms: BTreeMap<String, AlgorithmDef>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionDef>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskDef>,
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineDef>,
}

impl PipelineCatalog {
    /// A catalog holding only the built-in markup elements.
    pub fn seeded() -> Self {
        let mut catalog = Self::default();
        let algorithm = AlgorithmDef {
            name: BUILTIN_MARKUP_ALGORITHM.to_string(),
            description: "Generic markup of detections onto media.".to_string(),
            action_type: ActionType::Markup,
            requires_states: Vec::new(),
            provides_states: Vec::new(),
            properties: Vec::new(),
            supports_batch: true,
            supports_stream: false,
        };
        let action = ActionDef {
            name: BUILTIN_MARKUP_ACTION.to_string(),
            description: "Generic markup action.".to_string(),
            algorithm: algorithm.name.clone(),
            properties: Vec::new(),
        };
        let task = TaskDef {
            name: BUILTIN_MARKUP_TASK.to_string(),
            description: "Generic markup task.".to_string(),
            actions: vec![action.name.clone()],
        };
        catalog.algorithms.insert(algorithm.name.clone(), algorithm);
        catalog.actions.insert(action.name.clone(), action);
        catalog.tasks.insert(task.name.clone(), task);
        catalog
    }

    fn insert_algorithm(&mut self, algorithm: &AlgorithmDef) -> Result<()> {
        let key = algorithm.name.to_uppercase();
        if self.algorithms.contains_key(&key) {
            return Err(ComponentError::Subsystem(format!(
                "Could not add the \"{key}\" algorithm: an algorithm with that name already exists."
            )));
        }
        self.algorithms.insert(key, algorithm.clone());
        Ok(())
    }

    fn insert_action(&mut self, action: &ActionDef) -> Result<()> {
        let key = action.name.to_uppercase();
        if self.actions.contains_key(&key) {
            return Err(ComponentError::Subsystem(format!(
                "Could not add the {key} action: an action with that name already exists."
            )));
        }
        if !self.algorithms.contains_key(&action.algorithm.to_uppercase()) {
            return Err(ComponentError::Subsystem(format!(
                "Could not add the {key} action: algorithm {} does not exist.",
                action.algorithm
            )));
        }
        self.actions.insert(key, action.clone());
        Ok(())
    }

    fn insert_task(&mut self, task: &TaskDef) -> Result<()> {
        let key = task.name.to_uppercase();
        if self.tasks.contains_key(&key) {
            return Err(ComponentError::Subsystem(format!(
                "Could not add the {key} task: a task with that name already exists."
            )));
        }
        if let Some(missing) = task
            .actions
            .iter()
            .find(|a| !self.actions.contains_key(&a.to_uppercase()))
        {
            return Err(ComponentError::Subsystem(format!(
                "Could not add the {key} task: action {missing} does not exist."
            )));
        }
        self.tasks.insert(key, task.clone());
        Ok(())
    }

    fn insert_pipeline(&mut self, pipeline: &PipelineDef) -> Result<()> {
        let key = pipeline.name.to_uppercase();
        if self.pipelines.contains_key(&key) {
            return Err(ComponentError::Subsystem(format!(
                "Failed to add the {key} pipeline: a pipeline with that name already exists."
            )));
        }
        if let Some(missing) = pipeline
            .tasks
            .iter()
            .find(|t| !self.tasks.contains_key(&t.to_uppercase()))
        {
            return Err(ComponentError::Subsystem(format!(
                "Failed to add the {key} pipeline: task {missing} does not exist."
            )));
        }
        self.pipelines.insert(key, pipeline.clone());
        Ok(())
    }

    fn remove_algorithm(&mut self, name: &str) {
        let key = name.to_uppercase();
        if self.algorithms.remove(&key).is_none() {
            return;
        }
        let dependents: Vec<String> = self
            .actions
            .values()
            .filter(|a| a.algorithm.eq_ignore_ascii_case(&key))
            .map(|a| a.name.clone())
            .collect();
        for action in dependents {
            self.remove_action(&action);
        }
    }

    fn remove_action(&mut self, name: &str) {
        let key = name.to_uppercase();
        if self.actions.remove(&key).is_none() {
            return;
        }
        let dependents: Vec<String> = self
            .tasks
            .values()
            .filter(|t| t.actions.iter().any(|a| a.eq_ignore_ascii_case(&key)))
            .map(|t| t.name.clone())
            .collect();
        for task in dependents {
            self.remove_task(&task);
        }
    }

    fn remove_task(&mut self, name: &str) {
        let key = name.to_uppercase();
        if self.tasks.remove(&key).is_none() {
            return;
        }
        self.pipelines
            .retain(|_, p| !p.tasks.iter().any(|t| t.eq_ignore_ascii_case(&key)));
    }

    fn remove_pipeline(&mut self, name: &str) {
        self.pipelines.remove(&name.to_uppercase());
    }
}

// ---------------------------------------------------------------------------
// CatalogStore
// ---------------------------------------------------------------------------

/// [`PipelineElementStore`] over a [`PipelineCatalog`], in memory or backed
/// by a JSON file.
pub struct CatalogStore {
    state: JsonState<PipelineCatalog>,
}

impl CatalogStore {
    pub fn in_memory(catalog: PipelineCatalog) -> Self {
        Self {
            state: JsonState::in_memory(catalog),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            state: JsonState::open(path, PipelineCatalog::seeded)?,
        })
    }

    pub fn snapshot(&self) -> PipelineCatalog {
        self.state.read(|c| c.clone())
    }

    fn mutate(&self, f: impl FnOnce(&mut PipelineCatalog) -> Result<()>) -> Result<()> {
        self.state.update(f)
    }

    fn names<F>(&self, f: F) -> Result<BTreeSet<String>>
    where
        F: FnOnce(&PipelineCatalog) -> BTreeSet<String>,
    {
        Ok(self.state.read(f))
    }
}

impl PipelineElementStore for CatalogStore {
    fn save_algorithm(&self, algorithm: &AlgorithmDef) -> Result<()> {
        self.mutate(|c| c.insert_algorithm(algorithm))
    }

    fn save_action(&self, action: &ActionDef) -> Result<()> {
        self.mutate(|c| c.insert_action(action))
    }

    fn save_task(&self, task: &TaskDef) -> Result<()> {
        self.mutate(|c| c.insert_task(task))
    }

    fn save_pipeline(&self, pipeline: &PipelineDef) -> Result<()> {
        self.mutate(|c| c.insert_pipeline(pipeline))
    }

    fn delete_algorithm(&self, name: &str) -> Result<()> {
        self.mutate(|c| {
            c.remove_algorithm(name);
            Ok(())
        })
    }

    fn delete_action(&self, name: &str) -> Result<()> {
        self.mutate(|c| {
            c.remove_action(name);
            Ok(())
        })
    }

    fn delete_task(&self, name: &str) -> Result<()> {
        self.mutate(|c| {
            c.remove_task(name);
            Ok(())
        })
    }

    fn delete_pipeline(&self, name: &str) -> Result<()> {
        self.mutate(|c| {
            c.remove_pipeline(name);
            Ok(())
        })
    }

    fn algorithm_names(&self) -> Result<BTreeSet<String>> {
        self.names(|c| c.algorithms.keys().cloned().collect())
    }

    fn action_names(&self) -> Result<BTreeSet<String>> {
        self.names(|c| c.actions.keys().cloned().collect())
    }

    fn task_names(&self) -> Result<BTreeSet<String>> {
        self.names(|c| c.tasks.keys().cloned().collect())
    }

    fn pipeline_names(&self) -> Result<BTreeSet<String>> {
        self.names(|c| c.pipelines.keys().cloned().collect())
    }

    fn algorithm(&self, name: &str) -> Result<Option<AlgorithmDef>> {
        Ok(self
            .state
            .read(|c| c.algorithms.get(&name.to_uppercase()).cloned()))
    }

    fn action(&self, name: &str) -> Result<Option<ActionDef>> {
        Ok(self.state.read(|c| c.actions.get(&name.to_uppercase()).cloned()))
    }

    fn task(&self, name: &str) -> Result<Option<TaskDef>> {
        Ok(self.state.read(|c| c.tasks.get(&name.to_uppercase()).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::sample_descriptor;
    use crate::descriptor::{ActionSpec, PipelineSpec, TaskSpec};

    #[test]
    fn defaults_follow_algorithm_name_and_type() {
        let plan = ElementPlan::from_descriptor(&sample_descriptor());
        let algo = plan.algorithm.as_ref().unwrap();
        assert_eq!(algo.name, "HELLOWORLD");
        assert!(algo.supports_batch && !algo.supports_stream);
        assert_eq!(plan.actions[0].name, "HELLOWORLD DETECTION ACTION");
        assert_eq!(
            plan.actions[0].description,
            "Default action for the HELLOWORLD algorithm."
        );
        assert_eq!(plan.tasks[0].actions, vec!["HELLOWORLD DETECTION ACTION"]);
        assert_eq!(plan.pipelines[0].name, "HELLOWORLD DETECTION PIPELINE");
    }

    #[test]
    fn no_default_pipeline_when_states_required() {
        let mut d = sample_descriptor();
        d.algorithm
            .as_mut()
            .unwrap()
            .requires_collection
            .as_mut()
            .unwrap()
            .states = Some(vec!["DETECTION_FACE".to_string()]);
        let plan = ElementPlan::from_descriptor(&d);
        assert_eq!(plan.tasks.len(), 1);
        assert!(plan.pipelines.is_empty());
    }

    #[test]
    fn custom_elements_replace_defaults_per_kind() {
        let mut d = sample_descriptor();
        d.actions.push(ActionSpec {
            name: "hello custom action".to_string(),
            description: "d".to_string(),
            algorithm: "helloworld".to_string(),
            properties: Some(Vec::new()),
        });
        d.tasks.push(TaskSpec {
            name: "hello custom task".to_string(),
            description: "d".to_string(),
            actions: vec!["hello custom action".to_string()],
        });
        d.pipelines.push(PipelineSpec {
            name: "hello custom pipeline".to_string(),
            description: "d".to_string(),
            tasks: vec!["hello custom task".to_string()],
        });
        let plan = ElementPlan::from_descriptor(&d);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].name, "HELLO CUSTOM ACTION");
        assert_eq!(plan.actions[0].algorithm, "HELLOWORLD");
        assert_eq!(plan.pipelines[0].tasks, vec!["HELLO CUSTOM TASK"]);
    }

    #[test]
    fn store_rejects_dangling_references_and_duplicates() {
        let store = CatalogStore::in_memory(PipelineCatalog::default());
        let action = ActionDef {
            name: "A".to_string(),
            description: "d".to_string(),
            algorithm: "NOPE".to_string(),
            properties: Vec::new(),
        };
        let err = store.save_action(&action).unwrap_err();
        assert!(matches!(err, ComponentError::Subsystem(_)));

        let plan = ElementPlan::from_descriptor(&sample_descriptor());
        let algo = plan.algorithm.unwrap();
        store.save_algorithm(&algo).unwrap();
        assert!(store.save_algorithm(&algo).is_err());
    }

    #[test]
    fn deleting_algorithm_cascades_to_pipelines() {
        let store = CatalogStore::in_memory(PipelineCatalog::default());
        let plan = ElementPlan::from_descriptor(&sample_descriptor());
        store.save_algorithm(plan.algorithm.as_ref().unwrap()).unwrap();
        store.save_action(&plan.actions[0]).unwrap();
        store.save_task(&plan.tasks[0]).unwrap();
        store.save_pipeline(&plan.pipelines[0]).unwrap();

        store.delete_algorithm("helloworld").unwrap();
        assert!(store.action_names().unwrap().is_empty());
        assert!(store.task_names().unwrap().is_empty());
        assert!(store.pipeline_names().unwrap().is_empty());

        // Idempotent.
        store.delete_algorithm("HELLOWORLD").unwrap();
    }

    #[test]
    fn seeded_catalog_has_markup_elements() {
        let store = CatalogStore::in_memory(PipelineCatalog::seeded());
        assert!(store.task_names().unwrap().contains(BUILTIN_MARKUP_TASK));
        assert!(store.action(BUILTIN_MARKUP_ACTION.to_lowercase().as_str()).unwrap().is_some());
    }
}
