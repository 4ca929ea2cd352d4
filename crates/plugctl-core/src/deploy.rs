//! Deployment driver: extracts component packages onto cluster nodes, or
//! retracts them, by running the provisioning tool and reading its
//! transcript.
//!
//! The provisioning playbooks report what happened through markers in their
//! output:
//! - `"COMPONENT_TLD=<dir>"`: the package was extracted into `<dir>`
//! - `"COMPONENT_DESCRIPTOR_PATH=<path>"`: location of the extracted descriptor
//! - `FAILED_DUPLICATE_ERROR`: another component already owns the directory
//! - `Failed to connect to the host via ssh`: a node was unreachable
//! - `"FAILED_COMPONENT_NOT_FOUND_ERROR PATH=<path>"`: nothing to remove

use crate::config::ProvisioningConfig;
use crate::error::{ComponentError, Result};
use crate::paths;
use crate::process::{self, CancelToken};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

const DUPLICATE_MARKER: &str = "FAILED_DUPLICATE_ERROR";
const UNREACHABLE_MARKER: &str = "Failed to connect to the host via ssh";

fn descriptor_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""COMPONENT_DESCRIPTOR_PATH=([^"]+)""#).expect("valid regex")
    })
}

fn top_level_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""COMPONENT_TLD=([^"]+)""#).expect("valid regex"))
}

fn not_found_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""FAILED_COMPONENT_NOT_FOUND_ERROR PATH=([^"]+)""#).expect("valid regex")
    })
}

// ---------------------------------------------------------------------------
// ComponentDeployer
// ---------------------------------------------------------------------------

pub trait ComponentDeployer: Send + Sync {
    /// Extract `package_file_name` from the upload area onto every node and
    /// return the path of its descriptor.
    fn deploy(&self, package_file_name: &str) -> Result<PathBuf>;

    /// Remove the extracted `top_level_dir` from every node.
    fn undeploy(&self, top_level_dir: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transcript parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployTranscript {
    pub top_level_dir: Option<String>,
    pub descriptor_path: Option<PathBuf>,
    pub duplicate: bool,
    pub unreachable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Deployed(PathBuf),
    Duplicate,
    Unreachable,
    MissingDescriptor,
    Failed(i32),
}

impl DeployTranscript {
    pub fn observe(&mut self, line: &str) {
        self.duplicate |= line.contains(DUPLICATE_MARKER);
        self.unreachable |= line.contains(UNREACHABLE_MARKER);
        if self.descriptor_path.is_none() {
            if let Some(c) = descriptor_path_re().captures(line) {
                self.descriptor_path = Some(PathBuf::from(&c[1]));
            }
        }
        if self.top_level_dir.is_none() {
            if let Some(c) = top_level_dir_re().captures(line) {
                self.top_level_dir = Some(c[1].to_string());
            }
        }
    }

    /// The directory that was extracted, if the run got that far.
    pub fn extracted_dir(&self) -> Option<String> {
        self.top_level_dir.clone().or_else(|| {
            self.descriptor_path
                .as_deref()
                .and_then(paths::top_level_dir)
        })
    }

    pub fn outcome(&self, exit_code: i32) -> DeployOutcome {
        if self.duplicate {
            return DeployOutcome::Duplicate;
        }
        if exit_code == 0 {
            return match &self.descriptor_path {
                Some(p) => DeployOutcome::Deployed(p.clone()),
                None => DeployOutcome::MissingDescriptor,
            };
        }
        if self.unreachable {
            return DeployOutcome::Unreachable;
        }
        DeployOutcome::Failed(exit_code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndeployTranscript {
    pub missing_path: Option<String>,
    pub unreachable: bool,
}

impl UndeployTranscript {
    pub fn observe(&mut self, line: &str) {
        self.unreachable |= line.contains(UNREACHABLE_MARKER);
        if self.missing_path.is_none() {
            if let Some(c) = not_found_re().captures(line) {
                self.missing_path = Some(c[1].to_string());
            }
        }
    }

    pub fn outcome(&self, exit_code: i32) -> Result<()> {
        if self.unreachable {
            return Err(ComponentError::DeploymentUnreachable);
        }
        if let Some(path) = &self.missing_path {
            tracing::warn!(
                path = %path,
                "expected to find component top-level directory but it isn't there"
            );
            return Ok(());
        }
        if exit_code != 0 {
            return Err(ComponentError::DeploymentFailed(format!(
                "removal did not return success exit code: {exit_code}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ProvisioningDeployer
// ---------------------------------------------------------------------------

/// [`ComponentDeployer`] that runs the provisioning tool, for example
/// `ansible-playbook <playbook> --user=<u> -e @<vars> -e <key=value>`.
pub struct ProvisioningDeployer {
    tool: String,
    deploy_playbook: PathBuf,
    remove_playbook: PathBuf,
    user: String,
    vars_file: PathBuf,
    local_only: bool,
    cancel: CancelToken,
}

impl ProvisioningDeployer {
    pub fn new(cfg: &ProvisioningConfig, root: &Path, cancel: CancelToken) -> Self {
        Self {
            tool: cfg.tool.clone(),
            deploy_playbook: paths::resolve(root, &cfg.deploy_playbook),
            remove_playbook: paths::resolve(root, &cfg.remove_playbook),
            user: cfg.user.clone(),
            vars_file: paths::resolve(root, &cfg.vars_file),
            local_only: cfg.local_only,
            cancel,
        }
    }

    pub fn command_line(&self, playbook: &Path, extra_var: &str) -> Vec<String> {
        let mut args = vec![
            self.tool.clone(),
            playbook.display().to_string(),
            format!("--user={}", self.user),
            "-e".to_string(),
            format!("@{}", self.vars_file.display()),
            "-e".to_string(),
            extra_var.to_string(),
        ];
        if self.local_only {
            args.push("--connection=local".to_string());
        }
        args
    }

    fn run(
        &self,
        playbook: &Path,
        extra_var: &str,
        cancel: &CancelToken,
        mut on_line: impl FnMut(&str),
    ) -> Result<i32> {
        let tool = which::which(&self.tool).map_err(|_| {
            ComponentError::DeploymentFailed(format!(
                "failed to start {}; make sure it is on the PATH",
                self.tool
            ))
        })?;
        let argv = self.command_line(playbook, extra_var);
        tracing::info!(command = %argv.join(" "), "running provisioning command");

        let mut cmd = Command::new(tool);
        cmd.args(&argv[1..]);
        process::run_streaming(cmd, cancel, |line| {
            tracing::info!("{line}");
            on_line(line);
        })
    }
}

impl ComponentDeployer for ProvisioningDeployer {
    fn deploy(&self, package_file_name: &str) -> Result<PathBuf> {
        let mut transcript = DeployTranscript::default();
        let run = self.run(
            &self.deploy_playbook,
            &format!("uploaded_component={package_file_name}"),
            &self.cancel,
            |line| transcript.observe(line),
        );
        let exit_code = match run {
            Ok(code) => code,
            Err(ComponentError::Cancelled) => {
                tracing::warn!(package = %package_file_name, "deployment cancelled");
                self.undeploy_partial(&transcript);
                return Err(ComponentError::Cancelled);
            }
            Err(e) => return Err(e),
        };

        match transcript.outcome(exit_code) {
            DeployOutcome::Deployed(path) => Ok(path),
            DeployOutcome::Duplicate => {
                Err(ComponentError::DuplicateComponent(package_file_name.to_string()))
            }
            DeployOutcome::Unreachable => Err(ComponentError::DeploymentUnreachable),
            DeployOutcome::MissingDescriptor => {
                self.undeploy_partial(&transcript);
                Err(ComponentError::DeploymentFailed(
                    "couldn't find the descriptor path in the provisioning output".to_string(),
                ))
            }
            DeployOutcome::Failed(code) => {
                self.undeploy_partial(&transcript);
                Err(ComponentError::DeploymentFailed(format!(
                    "provisioning did not return success exit code: {code}"
                )))
            }
        }
    }

    fn undeploy(&self, top_level_dir: &str) -> Result<()> {
        self.undeploy_with(top_level_dir, &self.cancel)
    }
}

impl ProvisioningDeployer {
    fn undeploy_with(&self, top_level_dir: &str, cancel: &CancelToken) -> Result<()> {
        let mut transcript = UndeployTranscript::default();
        let exit_code = self.run(
            &self.remove_playbook,
            &format!("component_tld={top_level_dir}"),
            cancel,
            |line| transcript.observe(line),
        )?;
        transcript.outcome(exit_code)
    }

    /// Remove whatever a failed or cancelled deploy extracted. Runs under its
    /// own token so a cancelled deploy still gets cleaned up.
    fn undeploy_partial(&self, transcript: &DeployTranscript) {
        let Some(dir) = transcript.extracted_dir() else {
            return;
        };
        if let Err(e) = self.undeploy_with(&dir, &CancelToken::new()) {
            tracing::error!(dir = %dir, error = %e, "failed to clean up partially deployed component");
        }
    }
}
