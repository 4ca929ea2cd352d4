//! Where component services run: the cluster-wide service palette, the
//! per-node service lists, and the streaming service registry.

use crate::error::{ComponentError, Result};
use crate::state::JsonState;
use crate::types::SourceLanguage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sep: Option<String>,
}

/// A launchable batch service. The palette holds one per component; each
/// node holds its own copy with a node-specific instance count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceModel {
    pub name: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_directory: String,
    pub launcher: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
    #[serde(default)]
    pub service_count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeModel {
    pub host: String,
    /// Nodes that receive newly registered services automatically at startup.
    #[serde(default)]
    pub auto_configured: bool,
    #[serde(default)]
    pub services: Vec<ServiceModel>,
}

impl NodeModel {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            auto_configured: false,
            services: Vec::new(),
        }
    }

    pub fn service_mut(&mut self, name: &str) -> Option<&mut ServiceModel> {
        self.services.iter_mut().find(|s| s.name == name)
    }

    /// Add `service`, or overwrite the existing entry of the same name.
    pub fn put_service(&mut self, service: ServiceModel) {
        match self.service_mut(&service.name) {
            Some(existing) => *existing = service,
            None => self.services.push(service),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingServiceModel {
    pub service_name: String,
    pub algorithm_name: String,
    pub language: SourceLanguage,
    pub library_path: String,
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait NodeServiceManager: Send + Sync {
    /// The cluster-wide service palette, keyed by service name.
    fn service_models(&self) -> Result<BTreeMap<String, ServiceModel>>;

    fn set_service_models(&self, models: BTreeMap<String, ServiceModel>) -> Result<()>;

    /// Add a service to the palette. Returns false if the name is taken.
    fn add_service(&self, service: ServiceModel) -> Result<bool>;

    /// Remove a service from the palette. Returns false if it was absent.
    fn remove_service(&self, name: &str) -> Result<bool>;

    fn node_models(&self) -> Result<Vec<NodeModel>>;

    /// Persist the complete node configuration and apply it.
    fn save_and_reload_node_config(&self, nodes: Vec<NodeModel>) -> Result<()>;
}

pub trait StreamingServiceRegistry: Send + Sync {
    fn add_service(&self, model: StreamingServiceModel) -> Result<()>;
    fn delete_service(&self, name: &str) -> Result<()>;
    fn services(&self) -> Result<Vec<StreamingServiceModel>>;
}

// ---------------------------------------------------------------------------
// File / memory backed implementations
// ---------------------------------------------------------------------------

pub struct CatalogNodeManager {
    services: JsonState<BTreeMap<String, ServiceModel>>,
    nodes: JsonState<Vec<NodeModel>>,
}

impl CatalogNodeManager {
    pub fn in_memory(nodes: Vec<NodeModel>) -> Self {
        Self {
            services: JsonState::in_memory(BTreeMap::new()),
            nodes: JsonState::in_memory(nodes),
        }
    }

    pub fn open(services_path: &Path, nodes_path: &Path) -> Result<Self> {
        Ok(Self {
            services: JsonState::open(services_path, BTreeMap::new)?,
            nodes: JsonState::open(nodes_path, Vec::new)?,
        })
    }
}

impl NodeServiceManager for CatalogNodeManager {
    fn service_models(&self) -> Result<BTreeMap<String, ServiceModel>> {
        Ok(self.services.read(|s| s.clone()))
    }

    fn set_service_models(&self, models: BTreeMap<String, ServiceModel>) -> Result<()> {
        self.services.update(|s| {
            *s = models;
            Ok(())
        })
    }

    fn add_service(&self, service: ServiceModel) -> Result<bool> {
        self.services.update(|s| {
            if s.contains_key(&service.name) {
                return Ok(false);
            }
            s.insert(service.name.clone(), service);
            Ok(true)
        })
    }

    fn remove_service(&self, name: &str) -> Result<bool> {
        self.services.update(|s| Ok(s.remove(name).is_some()))
    }

    fn node_models(&self) -> Result<Vec<NodeModel>> {
        Ok(self.nodes.read(|n| n.clone()))
    }

    fn save_and_reload_node_config(&self, nodes: Vec<NodeModel>) -> Result<()> {
        self.nodes.update(|n| {
            *n = nodes;
            Ok(())
        })
    }
}

pub struct CatalogStreamingRegistry {
    services: JsonState<Vec<StreamingServiceModel>>,
}

impl CatalogStreamingRegistry {
    pub fn in_memory() -> Self {
        Self {
            services: JsonState::in_memory(Vec::new()),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            services: JsonState::open(path, Vec::new)?,
        })
    }
}

impl StreamingServiceRegistry for CatalogStreamingRegistry {
    fn add_service(&self, model: StreamingServiceModel) -> Result<()> {
        self.services.update(|s| {
            if s.iter().any(|m| m.service_name == model.service_name) {
                return Err(ComponentError::Subsystem(format!(
                    "a streaming service named {} already exists",
                    model.service_name
                )));
            }
            s.push(model);
            Ok(())
        })
    }

    fn delete_service(&self, name: &str) -> Result<()> {
        self.services.update(|s| {
            s.retain(|m| m.service_name != name);
            Ok(())
        })
    }

    fn services(&self) -> Result<Vec<StreamingServiceModel>> {
        Ok(self.services.read(|s| s.clone()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn service(name: &str, count: i32) -> ServiceModel {
        ServiceModel {
            name: name.to_string(),
            cmd: "/bin/true".to_string(),
            args: Vec::new(),
            working_directory: "/".to_string(),
            launcher: "simple".to_string(),
            description: String::new(),
            env_vars: Vec::new(),
            service_count: count,
        }
    }

    #[test]
    fn add_service_refuses_taken_name() {
        let mgr = CatalogNodeManager::in_memory(Vec::new());
        assert!(mgr.add_service(service("Hello", 1)).unwrap());
        assert!(!mgr.add_service(service("Hello", 2)).unwrap());
        assert_eq!(mgr.service_models().unwrap()["Hello"].service_count, 1);
        assert!(mgr.remove_service("Hello").unwrap());
        assert!(!mgr.remove_service("Hello").unwrap());
    }

    #[test]
    fn put_service_updates_in_place() {
        let mut node = NodeModel::new("h1");
        node.put_service(service("Hello", 1));
        node.put_service(service("Hello", 4));
        assert_eq!(node.services.len(), 1);
        assert_eq!(node.services[0].service_count, 4);
    }

    #[test]
    fn node_config_persists() {
        let dir = TempDir::new().unwrap();
        let services = dir.path().join("services.json");
        let nodes = dir.path().join("nodes.json");
        {
            let mgr = CatalogNodeManager::open(&services, &nodes).unwrap();
            let mut n = NodeModel::new("h1");
            n.put_service(service("Hello", 2));
            mgr.save_and_reload_node_config(vec![n]).unwrap();
        }
        let mgr = CatalogNodeManager::open(&services, &nodes).unwrap();
        assert_eq!(mgr.node_models().unwrap()[0].services[0].service_count, 2);
    }

    #[test]
    fn streaming_registry_rejects_duplicates() {
        let reg = CatalogStreamingRegistry::in_memory();
        let model = StreamingServiceModel {
            service_name: "Hello".to_string(),
            algorithm_name: "HELLO".to_string(),
            language: SourceLanguage::Cpp,
            library_path: "/lib/libhello.so".to_string(),
            env_vars: Vec::new(),
        };
        reg.add_service(model.clone()).unwrap();
        assert!(reg.add_service(model).is_err());
        reg.delete_service("Hello").unwrap();
        reg.delete_service("Hello").unwrap();
        assert!(reg.services().unwrap().is_empty());
    }
}
