//! Component descriptor: the JSON manifest shipped inside every package at
//! `descriptor/descriptor.json`.
//!
//! A descriptor with an `algorithm` describes a full component (one service,
//! one algorithm, optional custom actions/tasks/pipelines). A descriptor
//! without one is an "extras" descriptor that only contributes pipeline
//! elements built on algorithms registered by other components. Both go
//! through the same registration flow; `validate` applies the extra rules
//! only when an algorithm is present.

use crate::error::{ComponentError, Result};
use crate::types::{ActionType, SourceLanguage, ValueType};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptor {
    #[serde(default)]
    pub component_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_library: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_library: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub launch_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_variables: Option<Vec<EnvironmentVariable>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<AlgorithmSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipelines: Vec<PipelineSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    /// When `":"`, the value is appended to any existing value of the variable.
    #[serde(default)]
    pub sep: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub action_type: Option<ActionType>,
    #[serde(default)]
    pub requires_collection: Option<RequiresCollection>,
    #[serde(default)]
    pub provides_collection: Option<ProvidesCollection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequiresCollection {
    #[serde(default)]
    pub states: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidesCollection {
    #[serde(default)]
    pub states: Option<Vec<String>>,
    #[serde(default)]
    pub properties: Option<Vec<AlgorithmProperty>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmProperty {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub value_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub properties: Option<Vec<ActionProperty>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionProperty {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tasks: Vec<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl ComponentDescriptor {
    pub fn from_json(data: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(data).map_err(|e| ComponentError::DescriptorParse(e.to_string()))?;
        if uses_legacy_property_value(&value) {
            return Err(ComponentError::DescriptorParse(
                "algorithm.providesCollection.properties.value has been renamed to defaultValue"
                    .to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| ComponentError::DescriptorParse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ComponentError::DescriptorParse(format!("{}: {e}", path.display()))
        })?;
        Self::from_json(&data)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Extras descriptors carry pipeline elements only.
    pub fn is_extras(&self) -> bool {
        self.algorithm.is_none()
    }

    pub fn language(&self) -> Option<SourceLanguage> {
        self.source_language.as_deref()?.parse().ok()
    }

    pub fn supports_batch(&self) -> bool {
        !is_blank(self.batch_library.as_deref())
    }

    pub fn supports_stream(&self) -> bool {
        !is_blank(self.stream_library.as_deref())
    }

    pub fn env_vars(&self) -> &[EnvironmentVariable] {
        self.environment_variables.as_deref().unwrap_or(&[])
    }

    // -----------------------------------------------------------------------
    // Schema validation
    // -----------------------------------------------------------------------

    /// Collect every schema violation, then fail once with all of them.
    pub fn validate(&self) -> Result<()> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ComponentError::InvalidDescriptor { violations })
        }
    }

    pub fn violations(&self) -> Vec<String> {
        let mut v = Violations::default();
        v.not_blank("componentName", &self.component_name);
        if !self.component_name.trim().is_empty() && !is_plain_dir_name(&self.component_name) {
            v.push("componentName must be a plain directory name".to_string());
        }

        if let Some(algorithm) = &self.algorithm {
            match self.source_language.as_deref() {
                Some(lang) => {
                    if lang.parse::<SourceLanguage>().is_err() {
                        v.push("sourceLanguage must be java, c++, or python".to_string());
                    }
                }
                None => v.push("sourceLanguage must be java, c++, or python".to_string()),
            }
            if !self.supports_batch() && !self.supports_stream() {
                v.push("must contain batchLibrary, streamLibrary, or both".to_string());
            }
            match &self.environment_variables {
                None => v.not_null("environmentVariables", false),
                Some(vars) => {
                    for (i, var) in vars.iter().enumerate() {
                        let path = format!("environmentVariables[{i}]");
                        v.not_blank(&format!("{path}.name"), &var.name);
                        v.not_null(&format!("{path}.value"), var.value.is_some());
                        if let Some(sep) = &var.sep {
                            if sep != ":" {
                                v.push(format!("{path}.sep must be \":\" or null"));
                            }
                        }
                    }
                }
            }
            algorithm.collect_violations(&mut v);
        }

        for (i, action) in self.actions.iter().enumerate() {
            let path = format!("actions[{i}]");
            v.not_blank(&format!("{path}.name"), &action.name);
            v.not_blank(&format!("{path}.description"), &action.description);
            v.not_blank(&format!("{path}.algorithm"), &action.algorithm);
            match &action.properties {
                None => v.not_null(&format!("{path}.properties"), false),
                Some(props) => {
                    for (j, prop) in props.iter().enumerate() {
                        let prop_path = format!("{path}.properties[{j}]");
                        v.not_blank(&format!("{prop_path}.name"), &prop.name);
                        v.not_null(&format!("{prop_path}.value"), prop.value.is_some());
                    }
                }
            }
        }

        for (i, task) in self.tasks.iter().enumerate() {
            let path = format!("tasks[{i}]");
            v.not_blank(&format!("{path}.name"), &task.name);
            v.not_blank(&format!("{path}.description"), &task.description);
            v.not_empty_list(&format!("{path}.actions"), &task.actions);
        }

        for (i, pipeline) in self.pipelines.iter().enumerate() {
            let path = format!("pipelines[{i}]");
            v.not_blank(&format!("{path}.name"), &pipeline.name);
            v.not_blank(&format!("{path}.description"), &pipeline.description);
            v.not_empty_list(&format!("{path}.tasks"), &pipeline.tasks);
        }

        v.0
    }
}

impl AlgorithmSpec {
    /// Declared property names, upper-cased for case-insensitive lookup.
    pub fn property_names(&self) -> Vec<String> {
        self.provides_collection
            .as_ref()
            .and_then(|p| p.properties.as_ref())
            .map(|props| props.iter().map(|p| p.name.to_uppercase()).collect())
            .unwrap_or_default()
    }

    pub fn required_states(&self) -> &[String] {
        self.requires_collection
            .as_ref()
            .and_then(|r| r.states.as_deref())
            .unwrap_or(&[])
    }

    fn collect_violations(&self, v: &mut Violations) {
        v.not_blank("algorithm.name", &self.name);
        v.not_blank("algorithm.description", &self.description);
        v.not_null("algorithm.actionType", self.action_type.is_some());

        match &self.requires_collection {
            None => v.not_null("algorithm.requiresCollection", false),
            Some(req) => match &req.states {
                None => v.not_null("algorithm.requiresCollection.states", false),
                Some(states) => {
                    for (i, s) in states.iter().enumerate() {
                        v.not_blank(&format!("algorithm.requiresCollection.states[{i}]"), s);
                    }
                }
            },
        }

        let provides_path = "algorithm.providesCollection";
        match &self.provides_collection {
            None => v.not_null(provides_path, false),
            Some(provides) => {
                if provides.states.is_none() {
                    v.not_null(&format!("{provides_path}.states"), false);
                }
                match &provides.properties {
                    None => v.not_null(&format!("{provides_path}.properties"), false),
                    Some(props) => {
                        for (i, prop) in props.iter().enumerate() {
                            let path = format!("{provides_path}.properties[{i}]");
                            v.not_blank(&format!("{path}.name"), &prop.name);
                            v.not_blank(&format!("{path}.description"), &prop.description);
                            v.not_null(&format!("{path}.type"), prop.value_type.is_some());
                            prop.collect_value_violations(&path, v);
                        }
                    }
                }
            }
        }
    }
}

impl AlgorithmProperty {
    fn collect_value_violations(&self, path: &str, v: &mut Violations) {
        match (&self.default_value, &self.properties_key) {
            (Some(_), None) => {}
            (None, Some(key)) => v.not_blank(&format!("{path}.propertiesKey"), key),
            _ => {
                for field in ["defaultValue", "propertiesKey"] {
                    v.push(format!(
                        "{path}.{field} must provide either a defaultValue or propertiesKey, but not both."
                    ));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn push(&mut self, msg: String) {
        self.0.push(msg);
    }

    fn not_blank(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(format!("{field} may not be empty"));
        }
    }

    fn not_null(&mut self, field: &str, present: bool) {
        if !present {
            self.push(format!("{field} may not be null"));
        }
    }

    fn not_empty_list(&mut self, field: &str, items: &[String]) {
        if items.is_empty() {
            self.push(format!("{field} may not be empty"));
            return;
        }
        for (i, item) in items.iter().enumerate() {
            self.not_blank(&format!("{field}[{i}]"), item);
        }
    }
}

/// The component name doubles as its directory under the plugin area.
fn is_plain_dir_name(name: &str) -> bool {
    let mut parts = Path::new(name).components();
    !name.contains(['/', '\\'])
        && matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None))
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|s| s.trim().is_empty()).unwrap_or(true)
}

fn uses_legacy_property_value(value: &serde_json::Value) -> bool {
    value
        .pointer("/algorithm/providesCollection/properties")
        .and_then(|p| p.as_array())
        .map(|props| props.iter().any(|p| p.get("value").is_some()))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
