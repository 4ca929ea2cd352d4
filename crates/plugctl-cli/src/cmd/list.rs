use crate::output::{cell, print_json, print_table};
use anyhow::Context;
use plugctl_core::paths::RECORDS_FILE;
use plugctl_core::record::RecordStore;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let path = config.resolve_paths(root).data_file(RECORDS_FILE);
    let store = RecordStore::open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let records = store.all();

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No components.");
        return Ok(());
    }

    let rows = records
        .iter()
        .map(|r| {
            vec![
                cell(r.component_name.as_deref()),
                cell(r.package_file_name.as_deref()),
                r.state.to_string(),
                if r.managed { "managed" } else { "unmanaged" }.to_string(),
                cell(r.service_name.as_deref()),
            ]
        })
        .collect();
    print_table(&["COMPONENT", "PACKAGE", "STATE", "MODE", "SERVICE"], rows);
    Ok(())
}
