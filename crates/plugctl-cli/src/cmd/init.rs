use anyhow::Context;
use plugctl_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing plugctl in: {}", root.display());

    let config_path = paths::config_path(root);
    let config = if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        Config::load(root).context("failed to read existing config")?
    } else {
        let cfg = Config::default();
        cfg.save(root)
            .with_context(|| format!("failed to write {}", paths::CONFIG_FILE))?;
        println!("  created: {}", paths::CONFIG_FILE);
        cfg
    };

    let resolved = config.resolve_paths(root);
    for dir in [&resolved.upload_dir, &resolved.plugin_dir, &resolved.data_dir] {
        let existed = dir.is_dir();
        io::ensure_dir(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let shown = dir.strip_prefix(root).unwrap_or(dir);
        if existed {
            println!("  exists:  {}/", shown.display());
        } else {
            println!("  created: {}/", shown.display());
        }
    }
    Ok(())
}
