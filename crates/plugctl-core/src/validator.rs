//! Consistency checks for the custom actions, tasks, and pipelines a
//! descriptor brings along, against what is already registered.
//!
//! All checks always run; the caller gets every violation in one error.

use crate::descriptor::ComponentDescriptor;
use crate::error::{ComponentError, Result};
use crate::pipeline::PipelineElementStore;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineViolations {
    pub dup_actions: BTreeSet<String>,
    pub dup_tasks: BTreeSet<String>,
    pub dup_pipelines: BTreeSet<String>,
    pub invalid_algorithm_refs: BTreeSet<String>,
    pub invalid_action_refs: BTreeSet<String>,
    pub invalid_task_refs: BTreeSet<String>,
    /// Action name → property names its algorithm does not declare.
    pub actions_with_invalid_props: BTreeMap<String, BTreeSet<String>>,
    pub pipelines_with_invalid_processing_type: BTreeSet<String>,
}

impl PipelineViolations {
    pub fn is_empty(&self) -> bool {
        self.dup_actions.is_empty()
            && self.dup_tasks.is_empty()
            && self.dup_pipelines.is_empty()
            && self.invalid_algorithm_refs.is_empty()
            && self.invalid_action_refs.is_empty()
            && self.invalid_task_refs.is_empty()
            && self.actions_with_invalid_props.is_empty()
            && self.pipelines_with_invalid_processing_type.is_empty()
    }
}

impl fmt::Display for PipelineViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        for (kind, names) in [
            ("action", &self.dup_actions),
            ("task", &self.dup_tasks),
            ("pipeline", &self.dup_pipelines),
        ] {
            if !names.is_empty() {
                lines.push(format!(
                    "The following {kind} names are already in use: {}.",
                    join(names)
                ));
            }
        }
        for (kind, names) in [
            ("algorithms", &self.invalid_algorithm_refs),
            ("actions", &self.invalid_action_refs),
            ("tasks", &self.invalid_task_refs),
        ] {
            if !names.is_empty() {
                lines.push(format!(
                    "The following {kind} are referenced in the JSON descriptor but do not exist: {}.",
                    join(names)
                ));
            }
        }
        for (action, props) in &self.actions_with_invalid_props {
            lines.push(format!(
                "The \"{action}\" action contains the following invalid properties: {}.",
                join(props)
            ));
        }
        if !self.pipelines_with_invalid_processing_type.is_empty() {
            lines.push(format!(
                "The algorithms utilized in the following pipelines either do not all support batch \
                 processing or do not all support stream processing: {}",
                join(&self.pipelines_with_invalid_processing_type)
            ));
        }
        f.write_str(&lines.join("\n"))
    }
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Fail with [`ComponentError::InvalidCustomPipelines`] if any check finds
/// a violation.
pub fn validate(descriptor: &ComponentDescriptor, store: &dyn PipelineElementStore) -> Result<()> {
    let violations = find_violations(descriptor, store)?;
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ComponentError::InvalidCustomPipelines(Box::new(violations)))
    }
}

pub fn find_violations(
    descriptor: &ComponentDescriptor,
    store: &dyn PipelineElementStore,
) -> Result<PipelineViolations> {
    let existing_algorithms = store.algorithm_names()?;
    let existing_actions = store.action_names()?;
    let existing_tasks = store.task_names()?;
    let existing_pipelines = store.pipeline_names()?;

    let own_algorithm: BTreeSet<String> = descriptor
        .algorithm
        .iter()
        .map(|a| a.name.to_uppercase())
        .collect();
    let own_actions = upper_set(descriptor.actions.iter().map(|a| a.name.as_str()));
    let own_tasks = upper_set(descriptor.tasks.iter().map(|t| t.name.as_str()));
    let own_pipelines = upper_set(descriptor.pipelines.iter().map(|p| p.name.as_str()));

    let mut v = PipelineViolations {
        dup_actions: intersect(&own_actions, &existing_actions),
        dup_tasks: intersect(&own_tasks, &existing_tasks),
        dup_pipelines: intersect(&own_pipelines, &existing_pipelines),
        ..PipelineViolations::default()
    };

    v.invalid_algorithm_refs = missing_refs(
        descriptor.actions.iter().map(|a| a.algorithm.as_str()),
        &own_algorithm,
        &existing_algorithms,
    );
    v.invalid_action_refs = missing_refs(
        descriptor.tasks.iter().flat_map(|t| t.actions.iter().map(String::as_str)),
        &own_actions,
        &existing_actions,
    );
    v.invalid_task_refs = missing_refs(
        descriptor.pipelines.iter().flat_map(|p| p.tasks.iter().map(String::as_str)),
        &own_tasks,
        &existing_tasks,
    );

    v.actions_with_invalid_props = actions_with_invalid_props(descriptor, store)?;
    v.pipelines_with_invalid_processing_type = pipelines_with_invalid_processing_type(descriptor, store)?;

    Ok(v)
}

fn upper_set<'a>(names: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    names.map(str::to_uppercase).collect()
}

fn intersect(a: &BTreeSet<String>, b: &BTreeSet<String>) -> BTreeSet<String> {
    let b_upper: BTreeSet<String> = b.iter().map(|s| s.to_uppercase()).collect();
    a.intersection(&b_upper).cloned().collect()
}

fn missing_refs<'a>(
    refs: impl Iterator<Item = &'a str>,
    own: &BTreeSet<String>,
    existing: &BTreeSet<String>,
) -> BTreeSet<String> {
    refs.map(str::to_uppercase)
        .filter(|r| !own.contains(r) && !existing.iter().any(|e| e.eq_ignore_ascii_case(r)))
        .collect()
}

fn actions_with_invalid_props(
    descriptor: &ComponentDescriptor,
    store: &dyn PipelineElementStore,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut algo_props: BTreeMap<String, Option<BTreeSet<String>>> = BTreeMap::new();
    if let Some(algo) = &descriptor.algorithm {
        algo_props.insert(
            algo.name.to_uppercase(),
            Some(algo.property_names().into_iter().collect()),
        );
    }

    let mut result = BTreeMap::new();
    for action in &descriptor.actions {
        let algo_key = action.algorithm.to_uppercase();
        if !algo_props.contains_key(&algo_key) {
            let props = store.algorithm(&algo_key)?.map(|a| a.property_names());
            algo_props.insert(algo_key.clone(), props);
        }
        // An unknown algorithm is reported as an invalid reference only.
        let Some(Some(allowed)) = algo_props.get(&algo_key) else {
            continue;
        };
        let extra: BTreeSet<String> = action
            .properties
            .iter()
            .flatten()
            .map(|p| p.name.to_uppercase())
            .filter(|p| !allowed.contains(p))
            .collect();
        if !extra.is_empty() {
            result.insert(action.name.clone(), extra);
        }
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy)]
struct Support {
    batch: bool,
    stream: bool,
}

impl Support {
    const ALL: Support = Support {
        batch: true,
        stream: true,
    };

    fn and(self, other: Support) -> Support {
        Support {
            batch: self.batch && other.batch,
            stream: self.stream && other.stream,
        }
    }
}

fn pipelines_with_invalid_processing_type(
    descriptor: &ComponentDescriptor,
    store: &dyn PipelineElementStore,
) -> Result<BTreeSet<String>> {
    let mut invalid = BTreeSet::new();
    for pipeline in &descriptor.pipelines {
        let mut overall = Support::ALL;
        let mut resolved = true;
        for task in &pipeline.tasks {
            match task_support(descriptor, store, task)? {
                Some(s) => overall = overall.and(s),
                None => {
                    resolved = false;
                    break;
                }
            }
        }
        if resolved && !overall.batch && !overall.stream {
            invalid.insert(pipeline.name.to_uppercase());
        }
    }
    Ok(invalid)
}

/// Processing modes every action in the task supports, or `None` when part
/// of the task cannot be resolved.
fn task_support(
    descriptor: &ComponentDescriptor,
    store: &dyn PipelineElementStore,
    task_name: &str,
) -> Result<Option<Support>> {
    let actions = match descriptor
        .tasks
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(task_name))
    {
        Some(t) => t.actions.clone(),
        None => match store.task(task_name)? {
            Some(t) => t.actions,
            None => return Ok(None),
        },
    };

    let mut support = Support::ALL;
    for action_name in &actions {
        let algo_name = match descriptor
            .actions
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(action_name))
        {
            Some(a) => a.algorithm.clone(),
            None => match store.action(action_name)? {
                Some(a) => a.algorithm,
                None => return Ok(None),
            },
        };
        match algorithm_support(descriptor, store, &algo_name)? {
            Some(s) => support = support.and(s),
            None => return Ok(None),
        }
    }
    Ok(Some(support))
}

fn algorithm_support(
    descriptor: &ComponentDescriptor,
    store: &dyn PipelineElementStore,
    algo_name: &str,
) -> Result<Option<Support>> {
    if let Some(algo) = &descriptor.algorithm {
        if algo.name.eq_ignore_ascii_case(algo_name) {
            return Ok(Some(Support {
                batch: descriptor.supports_batch(),
                stream: descriptor.supports_stream(),
            }));
        }
    }
    Ok(store.algorithm(algo_name)?.map(|a| Support {
        batch: a.supports_batch,
        stream: a.supports_stream,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::sample_descriptor;
    use crate::descriptor::{ActionProperty, ActionSpec, PipelineSpec, TaskSpec};
    use crate::pipeline::{
        ActionDef, AlgorithmDef, CatalogStore, PipelineCatalog, TaskDef,
    };
    use crate::types::ActionType;

    fn algo(name: &str, batch: bool, stream: bool) -> AlgorithmDef {
        AlgorithmDef {
            name: name.to_string(),
            description: "d".to_string(),
            action_type: ActionType::Detection,
            requires_states: Vec::new(),
            provides_states: Vec::new(),
            properties: Vec::new(),
            supports_batch: batch,
            supports_stream: stream,
        }
    }

    fn action(name: &str, algorithm: &str) -> ActionSpec {
        ActionSpec {
            name: name.to_string(),
            description: "d".to_string(),
            algorithm: algorithm.to_string(),
            properties: Some(Vec::new()),
        }
    }

    fn task(name: &str, actions: &[&str]) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            description: "d".to_string(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn pipeline(name: &str, tasks: &[&str]) -> PipelineSpec {
        PipelineSpec {
            name: name.to_string(),
            description: "d".to_string(),
            tasks: tasks.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn extras(name: &str) -> ComponentDescriptor {
        ComponentDescriptor {
            component_name: name.to_string(),
            ..ComponentDescriptor::default()
        }
    }

    /// A supports batch and stream, B stream only, C batch only.
    fn mixed_store() -> CatalogStore {
        let store = CatalogStore::in_memory(PipelineCatalog::default());
        store.save_algorithm(&algo("A", true, true)).unwrap();
        store.save_algorithm(&algo("B", false, true)).unwrap();
        store.save_algorithm(&algo("C", true, false)).unwrap();
        store
    }

    #[test]
    fn clean_descriptor_passes() {
        let store = CatalogStore::in_memory(PipelineCatalog::default());
        assert!(validate(&sample_descriptor(), &store).is_ok());
    }

    #[test]
    fn duplicates_are_case_insensitive() {
        let store = mixed_store();
        store
            .save_action(&ActionDef {
                name: "FOO ACTION".to_string(),
                description: "d".to_string(),
                algorithm: "A".to_string(),
                properties: Vec::new(),
            })
            .unwrap();
        let mut d = extras("Extras");
        d.actions.push(action("foo action", "A"));

        let v = find_violations(&d, &store).unwrap();
        assert!(v.dup_actions.contains("FOO ACTION"));

        let err = validate(&d, &store).unwrap_err();
        assert!(err
            .to_string()
            .contains("The following action names are already in use: FOO ACTION."));
    }

    #[test]
    fn dangling_references_reported_per_kind() {
        let store = mixed_store();
        let mut d = extras("Extras");
        d.actions.push(action("X ACTION", "NOPE"));
        d.tasks.push(task("X TASK", &["X ACTION", "MISSING ACTION"]));
        d.pipelines.push(pipeline("X PIPELINE", &["X TASK", "MISSING TASK"]));

        let v = find_violations(&d, &store).unwrap();
        assert_eq!(v.invalid_algorithm_refs, BTreeSet::from(["NOPE".to_string()]));
        assert_eq!(
            v.invalid_action_refs,
            BTreeSet::from(["MISSING ACTION".to_string()])
        );
        assert_eq!(v.invalid_task_refs, BTreeSet::from(["MISSING TASK".to_string()]));
        // Missing task is a reference problem, not a processing-type one.
        assert!(v.pipelines_with_invalid_processing_type.is_empty());
    }

    #[test]
    fn invalid_action_properties_against_descriptor_algorithm() {
        let store = CatalogStore::in_memory(PipelineCatalog::default());
        let mut d = sample_descriptor();
        let mut a = action("HELLO ACTION", "HelloWorld");
        a.properties = Some(vec![
            ActionProperty {
                name: "prop1".to_string(),
                value: Some("2".to_string()),
            },
            ActionProperty {
                name: "BOGUS".to_string(),
                value: Some("x".to_string()),
            },
        ]);
        d.actions.push(a);

        let v = find_violations(&d, &store).unwrap();
        assert_eq!(
            v.actions_with_invalid_props.get("HELLO ACTION"),
            Some(&BTreeSet::from(["BOGUS".to_string()]))
        );
        assert!(v
            .to_string()
            .contains("The \"HELLO ACTION\" action contains the following invalid properties: BOGUS."));
    }

    #[test]
    fn processing_type_intersection_across_tasks() {
        let store = mixed_store();
        let mut d = extras("Extras");
        d.actions.push(action("A ACTION", "A"));
        d.actions.push(action("B ACTION", "B"));
        d.actions.push(action("C ACTION", "C"));
        // Stream only: A is batch+stream, B is stream only.
        d.tasks.push(task("AB TASK", &["A ACTION", "B ACTION"]));
        d.tasks.push(task("C TASK", &["C ACTION"]));
        d.tasks.push(task("B TASK", &["B ACTION"]));
        d.pipelines.push(pipeline("BAD PIPELINE", &["AB TASK", "C TASK"]));
        d.pipelines.push(pipeline("GOOD PIPELINE", &["AB TASK", "B TASK"]));

        let v = find_violations(&d, &store).unwrap();
        assert_eq!(
            v.pipelines_with_invalid_processing_type,
            BTreeSet::from(["BAD PIPELINE".to_string()])
        );
    }

    #[test]
    fn processing_type_uses_registered_tasks() {
        let store = mixed_store();
        store
            .save_action(&ActionDef {
                name: "C ACTION".to_string(),
                description: "d".to_string(),
                algorithm: "C".to_string(),
                properties: Vec::new(),
            })
            .unwrap();
        store
            .save_task(&TaskDef {
                name: "C TASK".to_string(),
                description: "d".to_string(),
                actions: vec!["C ACTION".to_string()],
            })
            .unwrap();
        let mut d = extras("Extras");
        d.actions.push(action("B ACTION", "B"));
        d.tasks.push(task("B TASK", &["B ACTION"]));
        d.pipelines.push(pipeline("MIXED", &["B TASK", "c task"]));

        let v = find_violations(&d, &store).unwrap();
        assert!(v.pipelines_with_invalid_processing_type.contains("MIXED"));
    }

    #[test]
    fn all_violation_kinds_reported_together() {
        let store = mixed_store();
        store
            .save_action(&ActionDef {
                name: "DUP".to_string(),
                description: "d".to_string(),
                algorithm: "A".to_string(),
                properties: Vec::new(),
            })
            .unwrap();
        let mut d = extras("Extras");
        d.actions.push(action("dup", "A"));
        d.tasks.push(task("T", &["GONE"]));

        let err = validate(&d, &store).unwrap_err();
        let ComponentError::InvalidCustomPipelines(v) = err else {
            panic!("wrong error kind");
        };
        assert!(!v.dup_actions.is_empty());
        assert!(!v.invalid_action_refs.is_empty());
    }
}
