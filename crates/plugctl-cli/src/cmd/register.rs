use crate::output::print_json;
use anyhow::Context;
use plugctl_core::descriptor::ComponentDescriptor;
use plugctl_core::record::ComponentRecord;
use std::path::Path;

pub fn run(root: &Path, package: &str, json: bool) -> anyhow::Result<()> {
    let package = super::package_name(package);
    let name = package.clone();
    let record = super::with_manager(root, move |manager, _, _| manager.register_component(&name))
        .with_context(|| format!("failed to register {package}"))?;
    report("registered", &record, json)
}

pub fn run_reregister(root: &Path, package: &str, json: bool) -> anyhow::Result<()> {
    let package = super::package_name(package);
    let name = package.clone();
    let record = super::with_manager(root, move |manager, _, _| manager.reregister_component(&name))
        .with_context(|| format!("failed to re-register {package}"))?;
    report("re-registered", &record, json)
}

pub fn run_unmanaged(root: &Path, descriptor: &Path, json: bool) -> anyhow::Result<()> {
    let parsed = ComponentDescriptor::load(descriptor)
        .with_context(|| format!("failed to read {}", descriptor.display()))?;
    let name = parsed.component_name.clone();
    let outcome = super::with_manager(root, move |manager, _, _| {
        manager.register_unmanaged_component(&parsed)
    })
    .with_context(|| format!("failed to register unmanaged component {name}"))?;

    if json {
        return print_json(&outcome);
    }
    if outcome.was_modified {
        report("registered", &outcome.record, false)
    } else {
        println!("unchanged: {name}");
        Ok(())
    }
}

fn report(verb: &str, record: &ComponentRecord, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(record);
    }
    println!("{verb}: {} ({})", record.display_key(), record.state);
    if let Some(service) = &record.service_name {
        println!("  service:   {service}");
    }
    if let Some(service) = &record.streaming_service_name {
        println!("  streaming: {service}");
    }
    Ok(())
}
