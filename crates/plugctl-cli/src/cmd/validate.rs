use crate::output::print_json;
use anyhow::Context;
use plugctl_core::descriptor::ComponentDescriptor;
use plugctl_core::paths::PIPELINES_FILE;
use plugctl_core::pipeline::CatalogStore;
use plugctl_core::validator;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ValidationReport {
    component: String,
    valid: bool,
    errors: Vec<String>,
}

/// Check a descriptor's schema and, against the project's pipeline store,
/// its custom pipeline graph. Nothing is written.
pub fn run(root: &Path, descriptor: &Path, json: bool) -> anyhow::Result<()> {
    let parsed = ComponentDescriptor::load(descriptor)
        .with_context(|| format!("failed to read {}", descriptor.display()))?;

    let mut errors = parsed.violations();
    if errors.is_empty() {
        let config = super::load_config(root)?;
        let path = config.resolve_paths(root).data_file(PIPELINES_FILE);
        let store = CatalogStore::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if let Err(e) = validator::validate(&parsed, &store) {
            errors.push(e.to_string());
        }
    }

    let report = ValidationReport {
        component: parsed.component_name.clone(),
        valid: errors.is_empty(),
        errors,
    };
    if json {
        print_json(&report)?;
    } else if report.valid {
        println!("{}: ok", report.component);
    } else {
        for error in &report.errors {
            println!("[error] {error}");
        }
    }

    if !report.valid {
        anyhow::bail!("{} is not valid", descriptor.display());
    }
    Ok(())
}
