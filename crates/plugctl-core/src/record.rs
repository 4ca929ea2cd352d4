use crate::error::{ComponentError, Result};
use crate::paths;
use crate::state::JsonState;
use crate::types::ComponentState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ComponentRecord
// ---------------------------------------------------------------------------

/// Lifecycle record of one component package or descriptor.
///
/// A record is identified by its package file name, its uploaded file path,
/// or its component name; any one of them matching makes two records the
/// same record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_uploaded_file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    #[serde(default = "default_state")]
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor_path: Option<PathBuf>,
    #[serde(default = "default_managed")]
    pub managed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub actions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tasks: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pipelines: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_uploaded: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_registered: Option<DateTime<Utc>>,
}

fn default_state() -> ComponentState {
    ComponentState::Unknown
}

fn default_managed() -> bool {
    true
}

impl ComponentRecord {
    pub fn for_package(path: &Path) -> Self {
        Self {
            package_file_name: paths::file_name(path),
            full_uploaded_file_path: Some(path.to_path_buf()),
            managed: true,
            state: ComponentState::Unknown,
            ..Self::default()
        }
    }

    pub fn same_component(&self, other: &ComponentRecord) -> bool {
        fn eq<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            matches!((a, b), (Some(x), Some(y)) if x == y)
        }
        eq(&self.component_name, &other.component_name)
            || eq(&self.full_uploaded_file_path, &other.full_uploaded_file_path)
            || eq(&self.package_file_name, &other.package_file_name)
    }

    /// The first identifying key, for messages.
    pub fn display_key(&self) -> String {
        self.component_name
            .clone()
            .or_else(|| self.package_file_name.clone())
            .or_else(|| {
                self.full_uploaded_file_path
                    .as_ref()
                    .map(|p| p.display().to_string())
            })
            .unwrap_or_else(|| "<unnamed>".to_string())
    }

    pub fn top_level_dir(&self) -> Option<String> {
        self.descriptor_path.as_deref().and_then(paths::top_level_dir)
    }

    /// Forget everything registration attached to this record.
    pub fn clear_registration(&mut self) {
        self.algorithm_name = None;
        self.actions.clear();
        self.tasks.clear();
        self.pipelines.clear();
        self.service_name = None;
        self.streaming_service_name = None;
        self.date_registered = None;
    }
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Durable list of component records. Every operation is one critical
/// section, across processes too: a concurrent writer can never observe or
/// clobber a half-applied replace-by-key.
pub struct RecordStore {
    state: JsonState<Vec<ComponentRecord>>,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            state: JsonState::open(path, Vec::new)?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            state: JsonState::in_memory(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn all(&self) -> Vec<ComponentRecord> {
        self.state.read(|r| r.clone())
    }

    pub fn by_package(&self, package_file_name: &str) -> Option<ComponentRecord> {
        self.state.read(|records| {
            records
                .iter()
                .find(|r| r.package_file_name.as_deref() == Some(package_file_name))
                .cloned()
        })
    }

    pub fn by_name(&self, component_name: &str) -> Option<ComponentRecord> {
        self.state.read(|records| {
            records
                .iter()
                .find(|r| r.component_name.as_deref() == Some(component_name))
                .cloned()
        })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Replace the stored record for the same package (or, for unmanaged
    /// records, the same component name), or append it. A component name
    /// owned by any other record is a `DuplicateRecord`.
    pub fn update(&self, record: ComponentRecord) -> Result<()> {
        self.state.update(|records| {
            let slot = slot_of(records, &record);
            name_clash(records, slot, &record)?;
            match slot {
                Some(i) => records[i] = record,
                None => records.push(record),
            }
            Ok(())
        })
    }

    /// Fail with `DuplicateRecord` if another record already carries the
    /// component name of `record`.
    pub fn ensure_name_available(&self, record: &ComponentRecord) -> Result<()> {
        self.state.read(|records| name_clash(records, slot_of(records, record), record))
    }

    /// Insert a new record, rejecting any clash on name, path, or package.
    pub fn add(&self, record: ComponentRecord) -> Result<()> {
        self.state.update(|records| {
            if records.iter().any(|r| r.same_component(&record)) {
                return Err(ComponentError::DuplicateRecord(record.display_key()));
            }
            records.push(record);
            Ok(())
        })
    }

    pub fn add_uploaded(&self, package_path: &Path) -> Result<ComponentRecord> {
        let record = ComponentRecord {
            state: ComponentState::Uploaded,
            date_uploaded: Some(Utc::now()),
            ..ComponentRecord::for_package(package_path)
        };
        self.add(record.clone())?;
        Ok(record)
    }

    pub fn add_deployed(&self, package_path: &Path, descriptor_path: &Path) -> Result<ComponentRecord> {
        let record = ComponentRecord {
            state: ComponentState::Deployed,
            descriptor_path: Some(descriptor_path.to_path_buf()),
            date_uploaded: Some(Utc::now()),
            ..ComponentRecord::for_package(package_path)
        };
        self.add(record.clone())?;
        Ok(record)
    }

    pub fn add_upload_error(&self, package_file_name: &str) -> Result<ComponentRecord> {
        let record = ComponentRecord {
            package_file_name: Some(package_file_name.to_string()),
            state: ComponentState::UploadError,
            managed: true,
            ..ComponentRecord::default()
        };
        self.add(record.clone())?;
        Ok(record)
    }

    pub fn add_register_error(&self, package_path: &Path) -> Result<ComponentRecord> {
        let record = ComponentRecord {
            state: ComponentState::RegisterError,
            date_uploaded: Some(Utc::now()),
            ..ComponentRecord::for_package(package_path)
        };
        self.add(record.clone())?;
        Ok(record)
    }

    /// Set the state of the record for `package_file_name`, creating a
    /// minimal record if none exists. Returns the previous state.
    pub fn replace_package_state(
        &self,
        package_file_name: &str,
        state: ComponentState,
    ) -> Result<Option<ComponentState>> {
        self.state.update(|records| {
            match records
                .iter_mut()
                .find(|r| r.package_file_name.as_deref() == Some(package_file_name))
            {
                Some(r) => {
                    let prev = r.state;
                    r.state = state;
                    Ok(Some(prev))
                }
                None => {
                    records.push(ComponentRecord {
                        package_file_name: Some(package_file_name.to_string()),
                        state,
                        managed: true,
                        ..ComponentRecord::default()
                    });
                    Ok(None)
                }
            }
        })
    }

    /// Set the state of an existing record by component name. Unknown names
    /// are left alone. Returns the previous state.
    pub fn replace_component_state(
        &self,
        component_name: &str,
        state: ComponentState,
    ) -> Result<Option<ComponentState>> {
        self.state.update(|records| {
            Ok(records
                .iter_mut()
                .find(|r| r.component_name.as_deref() == Some(component_name))
                .map(|r| std::mem::replace(&mut r.state, state)))
        })
    }

    pub fn remove_component(&self, component_name: &str) -> Result<bool> {
        self.remove_where(|r| r.component_name.as_deref() == Some(component_name))
    }

    pub fn remove_package(&self, package_file_name: &str) -> Result<bool> {
        self.remove_where(|r| r.package_file_name.as_deref() == Some(package_file_name))
    }

    fn remove_where(&self, pred: impl Fn(&ComponentRecord) -> bool) -> Result<bool> {
        self.state.update(|records| {
            let before = records.len();
            records.retain(|r| !pred(r));
            Ok(records.len() != before)
        })
    }
}

/// Index of the stored record `record` would replace.
fn slot_of(records: &[ComponentRecord], record: &ComponentRecord) -> Option<usize> {
    if let Some(package) = &record.package_file_name {
        return records
            .iter()
            .position(|r| r.package_file_name.as_ref() == Some(package));
    }
    if let Some(path) = &record.full_uploaded_file_path {
        return records
            .iter()
            .position(|r| r.full_uploaded_file_path.as_ref() == Some(path));
    }
    let name = record.component_name.as_ref()?;
    records
        .iter()
        .position(|r| r.package_file_name.is_none() && r.component_name.as_ref() == Some(name))
}

fn name_clash(records: &[ComponentRecord], slot: Option<usize>, record: &ComponentRecord) -> Result<()> {
    let Some(name) = &record.component_name else {
        return Ok(());
    };
    let taken = records
        .iter()
        .enumerate()
        .any(|(i, r)| Some(i) != slot && r.component_name.as_ref() == Some(name));
    if taken {
        return Err(ComponentError::DuplicateRecord(name.clone()));
    }
    Ok(())
}
