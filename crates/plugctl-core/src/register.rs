//! Registration Orchestrator: takes a package (managed) or a descriptor
//! (unmanaged) to the `REGISTERED` state, persisting its pipeline elements
//! and services, and compensating for everything it did when a step fails.

use crate::archive;
use crate::descriptor::ComponentDescriptor;
use crate::error::{ComponentError, Result};
use crate::io;
use crate::manager::ComponentManager;
use crate::paths;
use crate::pipeline::{AlgorithmDef, ElementPlan};
use crate::placement::{EnvVar, ServiceModel, StreamingServiceModel};
use crate::record::ComponentRecord;
use crate::types::{ComponentState, SourceLanguage};
use crate::validator;
use chrono::Utc;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub record: ComponentRecord,
    /// False when an identical unmanaged registration already existed.
    pub was_modified: bool,
}

// ---------------------------------------------------------------------------
// Service construction
// ---------------------------------------------------------------------------

fn env_vars(descriptor: &ComponentDescriptor) -> Vec<EnvVar> {
    descriptor
        .env_vars()
        .iter()
        .map(|v| EnvVar {
            key: v.name.clone(),
            value: v.value.clone().unwrap_or_default(),
            sep: v.sep.clone(),
        })
        .collect()
}

/// The batch service for a managed component. The service reads requests
/// from `PLUGIN.<ACTIONTYPE>_<ALGORITHM>_REQUEST`.
pub fn batch_service(descriptor: &ComponentDescriptor, algorithm: &AlgorithmDef) -> Option<ServiceModel> {
    let library = descriptor.batch_library.clone()?;
    let language = descriptor.language()?;
    let name = descriptor.component_name.clone();
    let queue = format!("PLUGIN.{}_{}_REQUEST", algorithm.action_type, algorithm.name);

    let (cmd, args, launcher, working_directory) = match language {
        SourceLanguage::Java => (
            "${PLUGIN_HOME}/bin/start-java-component.sh",
            vec![library, queue, name.clone()],
            "generic",
            "${PLUGIN_HOME}/jars".to_string(),
        ),
        SourceLanguage::Cpp | SourceLanguage::Python => (
            "${PLUGIN_HOME}/bin/detection-component-executor",
            vec![library, queue],
            "simple",
            format!("${{PLUGIN_HOME}}/plugins/{name}"),
        ),
    };

    Some(ServiceModel {
        name,
        cmd: cmd.to_string(),
        args,
        working_directory,
        launcher: launcher.to_string(),
        description: algorithm.description.clone(),
        env_vars: env_vars(descriptor),
        service_count: 0,
    })
}

/// The streaming service for a managed component. Only C++ components
/// have a streaming runtime.
pub fn streaming_service(
    descriptor: &ComponentDescriptor,
    algorithm: &AlgorithmDef,
) -> Option<StreamingServiceModel> {
    if descriptor.language() != Some(SourceLanguage::Cpp) {
        return None;
    }
    Some(StreamingServiceModel {
        service_name: descriptor.component_name.clone(),
        algorithm_name: algorithm.name.clone(),
        language: SourceLanguage::Cpp,
        library_path: descriptor.stream_library.clone()?,
        env_vars: env_vars(descriptor),
    })
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

impl ComponentManager {
    /// Copy `source` into the upload directory and record it as `UPLOADED`.
    /// A package that cannot be read is recorded as `UPLOAD_ERROR`.
    pub fn upload_package(&self, source: &Path) -> Result<ComponentRecord> {
        let _guard = self.guard()?;
        self.require_managed_support()?;

        let file_name = paths::file_name(source)
            .filter(|_| paths::is_package(source))
            .ok_or_else(|| {
                ComponentError::DeploymentFailed(format!(
                    "{} is not a {} package",
                    source.display(),
                    paths::PACKAGE_EXTENSION
                ))
            })?;
        if let Some(existing) = self.records.by_package(&file_name) {
            return Err(ComponentError::DuplicateRecord(existing.display_key()));
        }

        let dest = self.settings.upload_dir.join(&file_name);
        let copied = io::ensure_dir(&self.settings.upload_dir).and_then(|_| {
            if source != dest {
                std::fs::copy(source, &dest)?;
            }
            archive::top_level_dir(&dest)?.ok_or_else(|| {
                ComponentError::DeploymentFailed(format!("{file_name} is an empty archive"))
            })
        });

        match copied {
            Ok(tld) => {
                tracing::info!(package = %file_name, top_level_dir = %tld, "uploaded package");
                self.records.add_uploaded(&dest)
            }
            Err(e) => {
                tracing::error!(package = %file_name, error = %e, "upload failed");
                if let Err(cleanup) = io::remove_file_if_exists(&dest) {
                    tracing::warn!(path = %dest.display(), error = %cleanup, "failed to remove rejected upload");
                }
                self.records.add_upload_error(&file_name)?;
                Err(e)
            }
        }
    }

    /// Deploy (unless already deployed) and register an uploaded package.
    pub fn register_component(&self, package_file_name: &str) -> Result<ComponentRecord> {
        let _guard = self.guard()?;
        self.register_locked(package_file_name)
    }

    pub(crate) fn register_locked(&self, package_file_name: &str) -> Result<ComponentRecord> {
        self.require_managed_support()?;

        let existing = self.records.by_package(package_file_name);
        let state = existing.as_ref().map(|r| r.state).unwrap_or_default();
        if !state.can_start_registration() {
            self.records
                .replace_package_state(package_file_name, ComponentState::RegisterError)?;
            return Err(ComponentError::RegistrationStatus { state });
        }
        let record = existing.unwrap_or_default();

        tracing::info!(package = %package_file_name, state = %state, "registering component");
        self.records
            .replace_package_state(package_file_name, ComponentState::Registering)?;

        let descriptor_path = match (state, &record.descriptor_path) {
            (ComponentState::Deployed, Some(path)) => path.clone(),
            _ => match self.deployer.deploy(package_file_name) {
                Ok(path) => path,
                Err(e) => {
                    self.mark_register_error(package_file_name);
                    return Err(e);
                }
            },
        };

        match self.install(&descriptor_path, record, true) {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::error!(package = %package_file_name, error = %e, "registration failed");
                self.mark_register_error(package_file_name);
                match paths::top_level_dir(&descriptor_path) {
                    Some(tld) => {
                        if let Err(undeploy) = self.deployer.undeploy(&tld) {
                            tracing::error!(
                                package = %package_file_name,
                                error = %undeploy,
                                "failed to undeploy after registration failure"
                            );
                        }
                    }
                    None => tracing::warn!(
                        path = %descriptor_path.display(),
                        "cannot derive top-level directory; skipping undeploy"
                    ),
                }
                Err(e)
            }
        }
    }

    /// Register `descriptor` on this node only. Re-submitting the descriptor
    /// of an identical unmanaged registration changes nothing.
    pub fn register_unmanaged_component(
        &self,
        descriptor: &ComponentDescriptor,
    ) -> Result<RegistrationOutcome> {
        let _guard = self.guard()?;
        descriptor.validate()?;
        let name = descriptor.component_name.as_str();

        if let Some(existing) = self.records.by_name(name) {
            if existing.managed {
                return Err(ComponentError::ManagedComponentConflict(name.to_string()));
            }
            if existing.state == ComponentState::Registered && same_descriptor(&existing, descriptor) {
                tracing::info!(component = %name, "unmanaged component is unchanged");
                return Ok(RegistrationOutcome {
                    record: existing,
                    was_modified: false,
                });
            }
            tracing::info!(component = %name, "replacing existing unmanaged registration");
            self.remove_locked(name, false)?;
        }

        let descriptor_path = paths::descriptor_path(&self.settings.plugin_dir, name);
        let component_dir = self.settings.plugin_dir.join(name);
        let created_dir = !component_dir.exists();

        let result = self.write_descriptor(descriptor, &descriptor_path).and_then(|_| {
            let record = ComponentRecord {
                component_name: Some(name.to_string()),
                managed: false,
                ..ComponentRecord::default()
            };
            self.install_descriptor(descriptor, &descriptor_path, record, false)
        });

        match result {
            Ok(record) => Ok(RegistrationOutcome {
                record,
                was_modified: true,
            }),
            Err(e) => {
                let cleanup = if created_dir {
                    io::remove_dir_if_exists(&component_dir)
                } else {
                    io::remove_file_if_exists(&descriptor_path)
                };
                if let Err(cleanup) = cleanup {
                    tracing::error!(component = %name, error = %cleanup, "failed to remove written descriptor");
                }
                Err(e)
            }
        }
    }

    /// Register a descriptor already on disk as an unmanaged component,
    /// leaving the file where it is.
    pub fn register_unmanaged_descriptor_file(&self, descriptor_path: &Path) -> Result<ComponentRecord> {
        let _guard = self.guard()?;
        let descriptor = ComponentDescriptor::load(descriptor_path)?;
        let name = descriptor.component_name.clone();
        if let Some(existing) = self.records.by_name(&name) {
            return Err(if existing.managed {
                ComponentError::ManagedComponentConflict(name)
            } else {
                ComponentError::DuplicateRecord(name)
            });
        }
        let record = ComponentRecord {
            component_name: Some(name),
            managed: false,
            ..ComponentRecord::default()
        };
        self.install_descriptor(&descriptor, descriptor_path, record, false)
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    fn mark_register_error(&self, package_file_name: &str) {
        if let Err(e) = self
            .records
            .replace_package_state(package_file_name, ComponentState::RegisterError)
        {
            tracing::error!(package = %package_file_name, error = %e, "failed to record registration error");
        }
    }

    fn write_descriptor(&self, descriptor: &ComponentDescriptor, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            io::ensure_dir(dir)?;
        }
        io::atomic_write(path, descriptor.to_json()?.as_bytes())
    }

    fn install(
        &self,
        descriptor_path: &Path,
        record: ComponentRecord,
        managed: bool,
    ) -> Result<ComponentRecord> {
        let descriptor = ComponentDescriptor::load(descriptor_path)?;
        self.install_descriptor(&descriptor, descriptor_path, record, managed)
    }

    /// Validate, persist elements and services, and mark the record
    /// registered. On failure everything persisted here is deleted again.
    fn install_descriptor(
        &self,
        descriptor: &ComponentDescriptor,
        descriptor_path: &Path,
        mut record: ComponentRecord,
        managed: bool,
    ) -> Result<ComponentRecord> {
        descriptor.validate()?;
        validator::validate(descriptor, self.pipelines.as_ref())?;

        record.clear_registration();
        record.component_name = Some(descriptor.component_name.clone());
        record.descriptor_path = Some(descriptor_path.to_path_buf());
        record.managed = managed;
        self.records.ensure_name_available(&record)?;

        let plan = ElementPlan::from_descriptor(descriptor);
        if let Err(e) = self.persist(descriptor, &plan, &mut record) {
            self.rollback(&record);
            return Err(e);
        }
        tracing::info!(
            component = %descriptor.component_name,
            managed,
            "registered component"
        );
        Ok(record)
    }

    fn persist(
        &self,
        descriptor: &ComponentDescriptor,
        plan: &ElementPlan,
        record: &mut ComponentRecord,
    ) -> Result<()> {
        if let Some(algorithm) = &plan.algorithm {
            self.pipelines.save_algorithm(algorithm)?;
            record.algorithm_name = Some(algorithm.name.clone());
        }
        for action in &plan.actions {
            self.pipelines.save_action(action)?;
            record.actions.insert(action.name.clone());
        }
        for task in &plan.tasks {
            self.pipelines.save_task(task)?;
            record.tasks.insert(task.name.clone());
        }
        for pipeline in &plan.pipelines {
            self.pipelines.save_pipeline(pipeline)?;
            record.pipelines.insert(pipeline.name.clone());
        }

        if record.managed {
            if let Some(algorithm) = &plan.algorithm {
                self.add_services(descriptor, algorithm, record)?;
            }
        }

        record.state = ComponentState::Registered;
        record.date_registered = Some(Utc::now());
        self.records.update(record.clone())
    }

    fn add_services(
        &self,
        descriptor: &ComponentDescriptor,
        algorithm: &AlgorithmDef,
        record: &mut ComponentRecord,
    ) -> Result<()> {
        if descriptor.supports_batch() {
            if let Some(service) = batch_service(descriptor, algorithm) {
                if self.nodes.service_models()?.contains_key(&service.name) {
                    return Err(ComponentError::DuplicateServiceName(service.name));
                }
                let name = service.name.clone();
                if !self.nodes.add_service(service)? {
                    return Err(ComponentError::Subsystem(format!(
                        "the node manager did not accept service \"{name}\""
                    )));
                }
                record.service_name = Some(name);
            }
        }

        if descriptor.supports_stream() {
            match streaming_service(descriptor, algorithm) {
                Some(model) => {
                    if self
                        .streaming
                        .services()?
                        .iter()
                        .any(|s| s.service_name == model.service_name)
                    {
                        return Err(ComponentError::DuplicateServiceName(model.service_name));
                    }
                    let name = model.service_name.clone();
                    self.streaming.add_service(model)?;
                    record.streaming_service_name = Some(name);
                }
                None => tracing::error!(
                    component = %descriptor.component_name,
                    language = ?descriptor.source_language,
                    "streaming services are only supported for C++ components; skipping"
                ),
            }
        }
        Ok(())
    }

    /// Best-effort undo of `persist`; failures are logged, not raised.
    fn rollback(&self, record: &ComponentRecord) {
        let name = record.display_key();
        if let Some(service) = &record.service_name {
            if let Err(e) = self.nodes.remove_service(service) {
                tracing::error!(component = %name, error = %e, "failed to remove service during cleanup");
            }
        }
        if let Some(service) = &record.streaming_service_name {
            if let Err(e) = self.streaming.delete_service(service) {
                tracing::error!(component = %name, error = %e, "failed to remove streaming service during cleanup");
            }
        }
        if let Err(e) = self.delete_elements(record) {
            tracing::error!(component = %name, error = %e, "failed to delete pipeline elements during cleanup");
        }
    }

    /// Delete the elements a record lists, dependents first.
    pub(crate) fn delete_elements(&self, record: &ComponentRecord) -> Result<()> {
        for name in &record.pipelines {
            self.pipelines.delete_pipeline(name)?;
        }
        for name in &record.tasks {
            self.pipelines.delete_task(name)?;
        }
        for name in &record.actions {
            self.pipelines.delete_action(name)?;
        }
        if let Some(name) = &record.algorithm_name {
            self.pipelines.delete_algorithm(name)?;
        }
        Ok(())
    }
}

fn same_descriptor(record: &ComponentRecord, descriptor: &ComponentDescriptor) -> bool {
    record
        .descriptor_path
        .as_deref()
        .and_then(|p| ComponentDescriptor::load(p).ok())
        .is_some_and(|on_disk| &on_disk == descriptor)
}
