use crate::error::{ComponentError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PathsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where uploaded `.tar.gz` packages are kept.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Where packages are extracted, one top-level directory per component.
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,
    /// Record store and collaborator state files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".plugctl")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            plugin_dir: default_plugin_dir(),
            data_dir: default_data_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProvisioningConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_deploy_playbook")]
    pub deploy_playbook: PathBuf,
    #[serde(default = "default_remove_playbook")]
    pub remove_playbook: PathBuf,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_vars_file")]
    pub vars_file: PathBuf,
    /// Run against the local host only (`--connection=local`).
    #[serde(default)]
    pub local_only: bool,
}

fn default_tool() -> String {
    "ansible-playbook".to_string()
}

fn default_deploy_playbook() -> PathBuf {
    PathBuf::from("playbooks/deploy-component.yml")
}

fn default_remove_playbook() -> PathBuf {
    PathBuf::from("playbooks/remove-component.yml")
}

fn default_user() -> String {
    "mpf".to_string()
}

fn default_vars_file() -> PathBuf {
    PathBuf::from("playbooks/vars.yml")
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            deploy_playbook: default_deploy_playbook(),
            remove_playbook: default_remove_playbook(),
            user: default_user(),
            vars_file: default_vars_file(),
            local_only: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ResolverConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// External dependency resolver. When unset the built-in resolver is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// StartupConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default)]
    pub skip_auto_registration: bool,
    #[serde(default = "default_auto_start")]
    pub auto_start_services: bool,
    #[serde(default = "default_num_services")]
    pub num_services_per_component: i32,
}

fn default_auto_start() -> bool {
    true
}

fn default_num_services() -> i32 {
    1
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            skip_auto_registration: false,
            auto_start_services: default_auto_start(),
            num_services_per_component: default_num_services(),
        }
    }
}

// ---------------------------------------------------------------------------
// DeploymentProfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentProfile {
    /// Packages are distributed to nodes with the provisioning tool.
    #[default]
    Standard,
    /// Components are baked into images; only descriptors are registered.
    Container,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub dependency_resolver: ResolverConfig,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub profile: DeploymentProfile,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            paths: PathsConfig::default(),
            provisioning: ProvisioningConfig::default(),
            dependency_resolver: ResolverConfig::default(),
            startup: StartupConfig::default(),
            profile: DeploymentProfile::default(),
        }
    }
}

/// Config paths made absolute against the project root.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub upload_dir: PathBuf,
    pub plugin_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl ResolvedPaths {
    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ComponentError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn resolve_paths(&self, root: &Path) -> ResolvedPaths {
        ResolvedPaths {
            upload_dir: paths::resolve(root, &self.paths.upload_dir),
            plugin_dir: paths::resolve(root, &self.paths.plugin_dir),
            data_dir: paths::resolve(root, &self.paths.data_dir),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.profile == DeploymentProfile::Standard {
            for (label, playbook) in [
                ("deploy_playbook", &self.provisioning.deploy_playbook),
                ("remove_playbook", &self.provisioning.remove_playbook),
            ] {
                if !paths::resolve(root, playbook).exists() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "provisioning.{label} '{}' does not exist",
                            playbook.display()
                        ),
                    });
                }
            }
            if self.provisioning.tool.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "provisioning.tool is empty".to_string(),
                });
            }
        }

        if self.startup.num_services_per_component < 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "startup.num_services_per_component={} is negative; no services will be started",
                    self.startup.num_services_per_component
                ),
            });
        }

        if let Some(cmd) = &self.dependency_resolver.command {
            if cmd.as_os_str().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "dependency_resolver.command is empty".to_string(),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
