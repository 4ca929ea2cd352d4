use crate::output::print_json;
use anyhow::Context;
use plugctl_core::ordering;
use std::path::Path;

/// Register everything found on disk without a record, then start services.
pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let report = super::with_manager(root, |manager, config, cancel| {
        let resolver = ordering::resolver(config.dependency_resolver.command.clone(), cancel.clone());
        manager.reconcile_startup(resolver.as_ref(), &config.startup)
    })
    .context("startup reconciliation failed")?;

    if json {
        return print_json(&report);
    }
    for name in &report.registered {
        println!("  registered: {name}");
    }
    for name in &report.recorded {
        println!("  recorded:   {name}");
    }
    for name in &report.failed {
        println!("  failed:     {name}");
    }
    println!(
        "{} registered, {} recorded, {} failed",
        report.registered.len(),
        report.recorded.len(),
        report.failed.len()
    );
    Ok(())
}
