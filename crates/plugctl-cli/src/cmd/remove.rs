use crate::output::print_json;
use anyhow::Context;
use serde_json::json;
use std::path::Path;

pub fn run(root: &Path, component: &str, json: bool) -> anyhow::Result<()> {
    let name = component.to_string();
    super::with_manager(root, move |manager, _, _| manager.remove_component(&name))
        .with_context(|| format!("failed to remove {component}"))?;
    if json {
        print_json(&json!({ "removed": component }))
    } else {
        println!("removed: {component}");
        Ok(())
    }
}

pub fn run_package(root: &Path, package: &str, json: bool) -> anyhow::Result<()> {
    let package = super::package_name(package);
    let name = package.clone();
    super::with_manager(root, move |manager, _, _| manager.remove_package(&name))
        .with_context(|| format!("failed to remove package {package}"))?;
    if json {
        print_json(&json!({ "removed": package }))
    } else {
        println!("removed: {package}");
        Ok(())
    }
}
