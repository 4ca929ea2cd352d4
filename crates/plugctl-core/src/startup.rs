//! Startup Reconciler: brings the record store in line with what is on disk
//! before the system accepts requests.
//!
//! Uploaded packages and extracted descriptors without a record are
//! registered in dependency order. A package whose descriptor is already
//! extracted is linked to it as `DEPLOYED` so it is not deployed twice; a
//! descriptor with no package is registered as an unmanaged component.

use crate::archive;
use crate::config::{DeploymentProfile, StartupConfig};
use crate::error::Result;
use crate::manager::ComponentManager;
use crate::ordering::DependencyResolver;
use crate::paths::{self, DESCRIPTOR_DIR, DESCRIPTOR_FILE};
use crate::record::ComponentRecord;
use crate::types::ComponentState;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    /// Components registered during this run.
    pub registered: Vec<String>,
    /// Packages or descriptors whose registration failed.
    pub failed: Vec<String>,
    /// Packages only recorded because ordering failed.
    pub recorded: Vec<String>,
}

/// Something on disk with no record yet.
#[derive(Debug, Clone)]
struct Pending {
    package: Option<PathBuf>,
    descriptor: Option<PathBuf>,
}

impl Pending {
    /// The path handed to the dependency resolver.
    fn order_key(&self) -> Option<&Path> {
        self.package.as_deref().or(self.descriptor.as_deref())
    }

    fn label(&self) -> String {
        self.order_key()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

impl ComponentManager {
    pub fn reconcile_startup(
        &self,
        resolver: &dyn DependencyResolver,
        startup: &StartupConfig,
    ) -> Result<StartupReport> {
        let mut report = StartupReport::default();
        if startup.skip_auto_registration {
            tracing::info!("skipping automatic component registration");
            return Ok(report);
        }

        let records = self.records.all();
        let known_descriptors: BTreeSet<&Path> = records
            .iter()
            .filter_map(|r| r.descriptor_path.as_deref())
            .collect();
        let descriptors: Vec<PathBuf> = discover_descriptors(&self.settings.plugin_dir)?
            .into_iter()
            .filter(|d| !known_descriptors.contains(d.as_path()))
            .collect();

        if self.settings.profile == DeploymentProfile::Container {
            for descriptor in descriptors {
                let pending = Pending {
                    package: None,
                    descriptor: Some(descriptor),
                };
                self.register_pending(&pending, &mut report);
            }
            return Ok(report);
        }

        let known_packages: BTreeSet<&Path> = records
            .iter()
            .filter_map(|r| r.full_uploaded_file_path.as_deref())
            .collect();
        let packages: Vec<PathBuf> = list_packages(&self.settings.upload_dir)?
            .into_iter()
            .filter(|p| !known_packages.contains(p.as_path()))
            .collect();

        let mut by_tld: BTreeMap<String, PathBuf> = descriptors
            .into_iter()
            .filter_map(|d| Some((paths::top_level_dir(&d)?, d)))
            .collect();

        let mut pending = Vec::new();
        for package in packages {
            let tld = match archive::top_level_dir(&package) {
                Ok(tld) => tld,
                Err(e) => {
                    tracing::warn!(package = %package.display(), error = %e, "could not read package");
                    None
                }
            };
            let descriptor = tld.and_then(|t| by_tld.remove(&t));
            pending.push(Pending {
                package: Some(package),
                descriptor,
            });
        }
        pending.extend(by_tld.into_values().map(|d| Pending {
            package: None,
            descriptor: Some(d),
        }));

        if pending.is_empty() {
            tracing::info!("no unregistered components found");
            return Ok(report);
        }

        let mut candidates: Vec<PathBuf> = records
            .iter()
            .filter(|r| r.state == ComponentState::Registered)
            .filter_map(|r| r.descriptor_path.clone())
            .filter(|p| p.is_file())
            .collect();
        candidates.extend(pending.iter().filter_map(|p| p.order_key().map(Path::to_path_buf)));

        let ordered = match resolver.registration_order(&candidates) {
            Ok(ordered) => ordered,
            Err(e) => {
                tracing::error!(error = %e, "could not order components; recording them without registering");
                self.record_unordered(&pending, &mut report);
                return Ok(report);
            }
        };

        let mut remaining: BTreeMap<PathBuf, Pending> = pending
            .iter()
            .filter_map(|p| Some((p.order_key()?.to_path_buf(), p.clone())))
            .collect();
        let mut registered = Vec::new();
        for path in &ordered {
            if let Some(p) = remaining.remove(path) {
                registered.extend(self.register_pending(&p, &mut report));
            }
        }
        for p in remaining.into_values() {
            tracing::warn!(path = %p.label(), "resolver did not order component; registering last");
            registered.extend(self.register_pending(&p, &mut report));
        }

        if let Err(e) = self.start_services(&registered, startup) {
            tracing::error!(error = %e, "failed to start services for new components");
        }
        Ok(report)
    }

    fn register_pending(&self, pending: &Pending, report: &mut StartupReport) -> Option<ComponentRecord> {
        let label = pending.label();
        let result = match (&pending.package, &pending.descriptor) {
            (Some(package), descriptor) => self.register_found_package(package, descriptor.as_deref()),
            (None, Some(descriptor)) => self.register_unmanaged_descriptor_file(descriptor),
            (None, None) => return None,
        };
        match result {
            Ok(record) => {
                report.registered.push(record.display_key());
                Some(record)
            }
            Err(e) => {
                tracing::error!(path = %label, error = %e, "startup registration failed");
                report.failed.push(label);
                None
            }
        }
    }

    fn register_found_package(&self, package: &Path, descriptor: Option<&Path>) -> Result<ComponentRecord> {
        let record = match descriptor {
            Some(d) => self.records.add_deployed(package, d)?,
            None => self.records.add_uploaded(package)?,
        };
        let name = record.package_file_name.unwrap_or_default();
        self.register_component(&name)
    }

    fn record_unordered(&self, pending: &[Pending], report: &mut StartupReport) {
        for p in pending {
            let Some(package) = &p.package else { continue };
            let result = match &p.descriptor {
                Some(d) => self.records.add_deployed(package, d),
                None => self.records.add_register_error(package),
            };
            match result {
                Ok(record) => report.recorded.push(record.display_key()),
                Err(e) => {
                    tracing::error!(package = %package.display(), error = %e, "failed to record package");
                    report.failed.push(p.label());
                }
            }
        }
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    Ok(entries)
}

fn list_packages(upload_dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(sorted_entries(upload_dir)?
        .into_iter()
        .filter(|p| p.is_file() && paths::is_package(p))
        .collect())
}

/// Per plugin directory: `descriptor/descriptor.json`, else the first
/// `.json` file in `descriptor/`.
fn discover_descriptors(plugin_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for dir in sorted_entries(plugin_dir)?.into_iter().filter(|p| p.is_dir()) {
        let descriptor_dir = dir.join(DESCRIPTOR_DIR);
        let main = descriptor_dir.join(DESCRIPTOR_FILE);
        if main.is_file() {
            found.push(main);
            continue;
        }
        let fallback = sorted_entries(&descriptor_dir)?
            .into_iter()
            .find(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"));
        found.extend(fallback);
    }
    Ok(found)
}
