use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "plugctl.yaml";

pub const RECORDS_FILE: &str = "components.json";
pub const PIPELINES_FILE: &str = "pipelines.json";
pub const SERVICES_FILE: &str = "services.json";
pub const NODES_FILE: &str = "nodes.json";
pub const STREAMING_FILE: &str = "streaming-services.json";
/// Held for the duration of every lifecycle operation on a project.
pub const OPERATION_LOCK_FILE: &str = "plugctl.lock";

/// Every extracted component keeps its manifest at
/// `<plugin_dir>/<TLD>/descriptor/descriptor.json`.
pub const DESCRIPTOR_DIR: &str = "descriptor";
pub const DESCRIPTOR_FILE: &str = "descriptor.json";

pub const PACKAGE_EXTENSION: &str = ".tar.gz";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn descriptor_path(plugin_dir: &Path, top_level_dir: &str) -> PathBuf {
    plugin_dir
        .join(top_level_dir)
        .join(DESCRIPTOR_DIR)
        .join(DESCRIPTOR_FILE)
}

/// The component directory that owns a descriptor: two levels above the file.
pub fn component_dir(descriptor_path: &Path) -> Option<&Path> {
    descriptor_path.parent()?.parent()
}

/// The top-level directory name a component was extracted into.
pub fn top_level_dir(descriptor_path: &Path) -> Option<String> {
    component_dir(descriptor_path)?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

pub fn is_package(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(PACKAGE_EXTENSION))
        .unwrap_or(false)
}

pub fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Resolve `path` against `root` unless it is already absolute.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
