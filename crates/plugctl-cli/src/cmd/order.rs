use crate::output::print_json;
use anyhow::Context;
use plugctl_core::ordering;
use std::path::{Path, PathBuf};

/// Print `paths` in registration order, or, with `changed`, the order in
/// which `changed` and its dependents must be re-registered.
pub fn run(
    root: &Path,
    paths: Vec<PathBuf>,
    changed: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let command = config.dependency_resolver.command.clone();

    let ordered = crate::worker::run_cancellable(move |cancel| {
        let resolver = ordering::resolver(command, cancel);
        match &changed {
            Some(changed) => resolver.re_registration_order(changed, &paths),
            None => resolver.registration_order(&paths),
        }
    })
    .context("failed to determine registration order")?;

    if json {
        return print_json(&ordered);
    }
    for path in &ordered {
        println!("{}", path.display());
    }
    Ok(())
}
