pub mod init;
pub mod list;
pub mod order;
pub mod register;
pub mod remove;
pub mod startup;
pub mod upload;
pub mod validate;

use crate::worker;
use anyhow::Context;
use plugctl_core::config::{Config, WarnLevel};
use plugctl_core::manager::ComponentManager;
use plugctl_core::paths;
use plugctl_core::process::CancelToken;
use std::path::Path;

/// Load `plugctl.yaml` and log anything `Config::validate` flags.
pub(crate) fn load_config(root: &Path) -> anyhow::Result<Config> {
    let config = Config::load(root).with_context(|| {
        format!(
            "failed to load {} under {} (run `plugctl init`)",
            paths::CONFIG_FILE,
            root.display()
        )
    })?;
    for warning in config.validate(root) {
        match warning.level {
            WarnLevel::Warning => tracing::warn!("{}", warning.message),
            WarnLevel::Error => tracing::error!("{}", warning.message),
        }
    }
    Ok(config)
}

/// Open the project's manager on a cancellable worker and run `op` with it.
pub(crate) fn with_manager<T, F>(root: &Path, op: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ComponentManager, &Config, &CancelToken) -> plugctl_core::Result<T> + Send + 'static,
{
    let config = load_config(root)?;
    let root = root.to_path_buf();
    worker::run_cancellable(move |cancel| {
        let manager = ComponentManager::open(&root, &config, cancel.clone())?;
        op(&manager, &config, &cancel)
    })
}

/// Accept either a bare package file name or a path to it.
pub(crate) fn package_name(arg: &str) -> String {
    paths::file_name(Path::new(arg)).unwrap_or_else(|| arg.to_string())
}
