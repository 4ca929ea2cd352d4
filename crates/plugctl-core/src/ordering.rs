//! Dependency Orderer: decides the order in which a set of components must
//! be registered so that every component is registered after the components
//! whose pipeline elements it builds on.

use crate::archive;
use crate::descriptor::ComponentDescriptor;
use crate::error::{ComponentError, Result};
use crate::paths::{self, DESCRIPTOR_DIR, DESCRIPTOR_FILE};
use crate::pipeline::{
    ElementPlan, BUILTIN_MARKUP_ACTION, BUILTIN_MARKUP_ALGORITHM, BUILTIN_MARKUP_TASK,
};
use crate::process::{self, CancelToken, Stream};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

pub trait DependencyResolver: Send + Sync {
    /// Order `paths` (packages or descriptor files) dependencies first.
    fn registration_order(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>>;

    /// Order `changed` and every component among `others` that depends on
    /// it, directly or transitively. `changed` comes first.
    fn re_registration_order(&self, changed: &Path, others: &[PathBuf]) -> Result<Vec<PathBuf>>;
}

// ---------------------------------------------------------------------------
// External resolver
// ---------------------------------------------------------------------------

/// Runs an external resolver program. It receives the candidate paths as
/// arguments (prefixed by `--for-single-component <changed>` for
/// re-registration) and prints one ordered path per line on stdout.
pub struct ScriptDependencyResolver {
    command: PathBuf,
    cancel: CancelToken,
}

impl ScriptDependencyResolver {
    pub fn new(command: PathBuf, cancel: CancelToken) -> Self {
        Self { command, cancel }
    }

    fn run(&self, args: Vec<String>) -> Result<Vec<PathBuf>> {
        tracing::info!(
            command = %self.command.display(),
            args = %args.join(" "),
            "running dependency resolver"
        );
        let mut cmd = Command::new(&self.command);
        cmd.args(&args);

        let mut ordered = Vec::new();
        let exit_code = process::run_tagged(cmd, &self.cancel, |stream, line| match stream {
            Stream::Stdout => {
                let line = line.trim();
                if !line.is_empty() {
                    ordered.push(PathBuf::from(line));
                }
            }
            Stream::Stderr => tracing::info!("{line}"),
        })
        .map_err(|e| match e {
            ComponentError::Cancelled => e,
            other => ComponentError::DependencyResolution(format!(
                "failed to run {}: {other}",
                self.command.display()
            )),
        })?;

        if exit_code != 0 {
            return Err(ComponentError::DependencyResolution(format!(
                "{} exited with code {exit_code}",
                self.command.display()
            )));
        }
        Ok(ordered)
    }
}

impl DependencyResolver for ScriptDependencyResolver {
    fn registration_order(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        self.run(paths.iter().map(|p| p.display().to_string()).collect())
    }

    fn re_registration_order(&self, changed: &Path, others: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut args = vec![
            "--for-single-component".to_string(),
            changed.display().to_string(),
        ];
        args.extend(others.iter().map(|p| p.display().to_string()));
        self.run(args)
    }
}

// ---------------------------------------------------------------------------
// Built-in resolver
// ---------------------------------------------------------------------------

/// Computes the order in-process from the descriptors themselves: a
/// component depends on whichever candidate provides an algorithm, action,
/// or task it references. The built-in markup elements never count.
#[derive(Debug, Default)]
pub struct NativeDependencyResolver;

#[derive(Debug, Default)]
struct Elements {
    algorithms: BTreeSet<String>,
    actions: BTreeSet<String>,
    tasks: BTreeSet<String>,
}

#[derive(Debug)]
struct Node {
    path: PathBuf,
    name: String,
    provides: Elements,
    requires: Elements,
}

impl Node {
    fn load(path: &Path) -> Result<Self> {
        let descriptor = load_descriptor(path)?;
        let plan = ElementPlan::from_descriptor(&descriptor);

        let mut provides = Elements::default();
        provides.algorithms.extend(plan.algorithm.iter().map(|a| a.name.clone()));
        provides.actions.extend(plan.actions.iter().map(|a| a.name.clone()));
        provides.tasks.extend(plan.tasks.iter().map(|t| t.name.clone()));

        let mut requires = Elements::default();
        for action in &plan.actions {
            if !provides.algorithms.contains(&action.algorithm)
                && action.algorithm != BUILTIN_MARKUP_ALGORITHM
            {
                requires.algorithms.insert(action.algorithm.clone());
            }
        }
        for name in plan.tasks.iter().flat_map(|t| &t.actions) {
            if !provides.actions.contains(name) && name != BUILTIN_MARKUP_ACTION {
                requires.actions.insert(name.clone());
            }
        }
        for name in plan.pipelines.iter().flat_map(|p| &p.tasks) {
            if !provides.tasks.contains(name) && name != BUILTIN_MARKUP_TASK {
                requires.tasks.insert(name.clone());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: descriptor.component_name,
            provides,
            requires,
        })
    }
}

fn load_descriptor(path: &Path) -> Result<ComponentDescriptor> {
    if paths::is_package(path) {
        let data = archive::read_descriptor(path)?.ok_or_else(|| {
            ComponentError::DependencyResolution(format!(
                "{} does not contain {DESCRIPTOR_DIR}/{DESCRIPTOR_FILE}",
                path.display()
            ))
        })?;
        ComponentDescriptor::from_json(&data)
    } else if path.is_dir() {
        ComponentDescriptor::load(&path.join(DESCRIPTOR_DIR).join(DESCRIPTOR_FILE))
    } else {
        ComponentDescriptor::load(path)
    }
}

/// Provider → dependents edges over `nodes`. When several candidates
/// provide the same element, the last one listed is the provider.
fn dependency_edges(nodes: &[Node]) -> Result<Vec<BTreeSet<usize>>> {
    fn index<'a>(
        nodes: &'a [Node],
        pick: impl Fn(&'a Node) -> &'a BTreeSet<String>,
        kind: &str,
    ) -> BTreeMap<&'a str, usize> {
        let mut map = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            for name in pick(node) {
                if let Some(prev) = map.insert(name.as_str(), i) {
                    tracing::warn!(
                        element = %name,
                        kind,
                        ignored = %nodes[prev].name,
                        provider = %node.name,
                        "element is provided by more than one component; using the last one"
                    );
                }
            }
        }
        map
    }

    let algorithms = index(nodes, |n| &n.provides.algorithms, "algorithm");
    let actions = index(nodes, |n| &n.provides.actions, "action");
    let tasks = index(nodes, |n| &n.provides.tasks, "task");

    let mut dependents = vec![BTreeSet::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        let wanted = [
            ("algorithm", &node.requires.algorithms, &algorithms),
            ("action", &node.requires.actions, &actions),
            ("task", &node.requires.tasks, &tasks),
        ];
        for (kind, names, providers) in wanted {
            for name in names {
                let provider = providers.get(name.as_str()).ok_or_else(|| {
                    ComponentError::DependencyResolution(format!(
                        "{} requires {kind} \"{name}\" but no component provides it",
                        node.name
                    ))
                })?;
                dependents[*provider].insert(i);
            }
        }
    }
    Ok(dependents)
}

/// Kahn's algorithm; ties are broken by component name, then path.
fn topo_order(nodes: &[Node], dependents: &[BTreeSet<usize>]) -> Result<Vec<usize>> {
    let mut in_degree = vec![0usize; nodes.len()];
    for targets in dependents {
        for &t in targets {
            in_degree[t] += 1;
        }
    }

    let key = |i: usize| (nodes[i].name.clone(), nodes[i].path.clone(), i);
    let mut ready: BTreeSet<_> = (0..nodes.len())
        .filter(|&i| in_degree[i] == 0)
        .map(key)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        let i = next.2;
        order.push(i);
        for &t in &dependents[i] {
            in_degree[t] -= 1;
            if in_degree[t] == 0 {
                ready.insert(key(t));
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<_> = (0..nodes.len())
            .filter(|i| in_degree[*i] > 0)
            .map(|i| nodes[i].name.as_str())
            .collect();
        return Err(ComponentError::DependencyResolution(format!(
            "dependency cycle between components: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

fn load_all(paths: &[PathBuf]) -> Result<Vec<Node>> {
    paths.iter().map(|p| Node::load(p)).collect()
}

impl DependencyResolver for NativeDependencyResolver {
    fn registration_order(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let nodes = load_all(paths)?;
        let dependents = dependency_edges(&nodes)?;
        let order = topo_order(&nodes, &dependents)?;
        Ok(order.into_iter().map(|i| nodes[i].path.clone()).collect())
    }

    fn re_registration_order(&self, changed: &Path, others: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut all = vec![changed.to_path_buf()];
        all.extend(others.iter().filter(|p| p.as_path() != changed).cloned());
        let nodes = load_all(&all)?;
        let dependents = dependency_edges(&nodes)?;
        let order = topo_order(&nodes, &dependents)?;

        // Index 0 is `changed`; collect everything reachable from it.
        let mut affected = BTreeSet::from([0usize]);
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            for &t in &dependents[i] {
                if affected.insert(t) {
                    stack.push(t);
                }
            }
        }

        Ok(order
            .into_iter()
            .filter(|i| affected.contains(i))
            .map(|i| nodes[i].path.clone())
            .collect())
    }
}

/// The configured resolver: the external command when one is set,
/// otherwise the built-in one.
pub fn resolver(command: Option<PathBuf>, cancel: CancelToken) -> Box<dyn DependencyResolver> {
    match command {
        Some(command) => Box::new(ScriptDependencyResolver::new(command, cancel)),
        None => Box::new(NativeDependencyResolver),
    }
}
