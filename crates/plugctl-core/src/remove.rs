//! Removal Orchestrator: undoes a registration using the element and
//! service names stored in the record, so removal stays symmetric with
//! registration even if the stores have drifted since.

use crate::error::{ComponentError, Result};
use crate::io;
use crate::manager::ComponentManager;
use crate::paths;
use crate::record::ComponentRecord;
use crate::types::ComponentState;

impl ComponentManager {
    /// Remove a registered component and its uploaded package.
    pub fn remove_component(&self, component_name: &str) -> Result<()> {
        let _guard = self.guard()?;
        self.remove_locked(component_name, false)
    }

    /// Remove a component but keep its package, leaving a fresh `UPLOADED`
    /// record behind so it can be registered again.
    pub fn unregister_retain_package(&self, package_file_name: &str) -> Result<ComponentRecord> {
        let _guard = self.guard()?;
        self.unregister_retain_locked(package_file_name)
    }

    /// Remove an uploaded package. Registered packages are removed in full.
    pub fn remove_package(&self, package_file_name: &str) -> Result<()> {
        let _guard = self.guard()?;
        self.require_managed_support()?;
        let record = self
            .records
            .by_package(package_file_name)
            .ok_or_else(|| ComponentError::ComponentNotFound(package_file_name.to_string()))?;

        if let Some(name) = &record.component_name {
            return self.remove_locked(name, false);
        }

        if let Some(tld) = record.top_level_dir() {
            self.deployer.undeploy(&tld)?;
        }
        if let Some(path) = &record.full_uploaded_file_path {
            io::remove_file_if_exists(path)?;
        }
        self.records.remove_package(package_file_name)?;
        tracing::info!(package = %package_file_name, "removed package");
        Ok(())
    }

    pub(crate) fn unregister_retain_locked(&self, package_file_name: &str) -> Result<ComponentRecord> {
        let record = self
            .records
            .by_package(package_file_name)
            .ok_or_else(|| ComponentError::ComponentNotFound(package_file_name.to_string()))?;
        let package_path = record
            .full_uploaded_file_path
            .clone()
            .unwrap_or_else(|| self.settings.upload_dir.join(package_file_name));

        match &record.component_name {
            Some(name) => self.remove_locked(name, true)?,
            None => {
                if let Some(tld) = record.top_level_dir() {
                    self.deployer.undeploy(&tld)?;
                }
                self.records.remove_package(package_file_name)?;
            }
        }
        self.records.add_uploaded(&package_path)
    }

    pub(crate) fn remove_locked(&self, component_name: &str, retain_package: bool) -> Result<()> {
        let record = self
            .records
            .by_name(component_name)
            .ok_or_else(|| ComponentError::ComponentNotFound(component_name.to_string()))?;
        tracing::info!(component = %component_name, managed = record.managed, "removing component");

        let result = if record.managed {
            self.remove_managed(&record, retain_package)
        } else {
            self.remove_unmanaged(&record)
        };

        if let Err(e) = result {
            tracing::error!(component = %component_name, error = %e, "removal failed");
            if let Err(mark) = self
                .records
                .replace_component_state(component_name, ComponentState::RegisterError)
            {
                tracing::error!(component = %component_name, error = %mark, "failed to record removal error");
            }
            return Err(e);
        }
        tracing::info!(component = %component_name, "removed component");
        Ok(())
    }

    fn remove_managed(&self, record: &ComponentRecord, retain_package: bool) -> Result<()> {
        self.require_managed_support()?;

        if let Some(service) = &record.service_name {
            let mut nodes = self.nodes.node_models()?;
            let mut changed = false;
            for node in &mut nodes {
                let before = node.services.len();
                node.services.retain(|s| &s.name != service);
                changed |= node.services.len() != before;
            }
            if changed {
                self.nodes.save_and_reload_node_config(nodes)?;
            }
            self.nodes.remove_service(service)?;
        }
        if let Some(service) = &record.streaming_service_name {
            self.streaming.delete_service(service)?;
        }

        self.delete_elements(record)?;

        match record.top_level_dir() {
            Some(tld) => self.deployer.undeploy(&tld)?,
            None => tracing::warn!(
                component = %record.display_key(),
                "no descriptor path recorded; skipping undeploy"
            ),
        }

        if !retain_package {
            if let Some(path) = &record.full_uploaded_file_path {
                io::remove_file_if_exists(path)?;
            }
        }
        self.forget(record)
    }

    fn remove_unmanaged(&self, record: &ComponentRecord) -> Result<()> {
        self.delete_elements(record)?;
        if let Some(dir) = record.descriptor_path.as_deref().and_then(paths::component_dir) {
            io::remove_dir_if_exists(dir)?;
        }
        self.forget(record)
    }

    fn forget(&self, record: &ComponentRecord) -> Result<()> {
        if let Some(name) = &record.component_name {
            self.records.remove_component(name)?;
        }
        if let Some(package) = &record.package_file_name {
            self.records.remove_package(package)?;
        }
        Ok(())
    }
}
