use crate::types::ComponentState;
use crate::validator::PipelineViolations;
use thiserror::Error;

/// Coarse classification of a failure, used by callers to decide between
/// reporting, retrying, and compensating without matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad descriptor or bad custom pipeline graph.
    Validation,
    /// Operation attempted from a lifecycle state that does not allow it.
    Status,
    NotFound,
    /// Another resource legitimately owns the name.
    Duplicate,
    /// A collaborator (pipeline store, service placement) rejected a write.
    Subsystem,
    /// Subprocess, host, or filesystem failure.
    Infrastructure,
    Cancelled,
    Unsupported,
}

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("not initialized: run 'plugctl init'")]
    NotInitialized,

    #[error("invalid component descriptor: {}", violations.join("; "))]
    InvalidDescriptor { violations: Vec<String> },

    #[error("could not parse component descriptor: {0}")]
    DescriptorParse(String),

    #[error("{0}")]
    InvalidCustomPipelines(Box<PipelineViolations>),

    #[error("cannot register a component in the {state} state")]
    RegistrationStatus { state: ComponentState },

    #[error("component not found: {0}")]
    ComponentNotFound(String),

    #[error("a component with the same top-level directory as {0} is already deployed")]
    DuplicateComponent(String),

    #[error("an existing component already uses the path/name: {0}")]
    DuplicateRecord(String),

    #[error("a service named \"{0}\" already exists")]
    DuplicateServiceName(String),

    #[error("component \"{0}\" is managed and cannot be replaced by an unmanaged registration")]
    ManagedComponentConflict(String),

    #[error("{0}")]
    Subsystem(String),

    #[error(
        "deployment failed because it could not connect to one of the hosts in the cluster; \
         if this is a single node configuration, try enabling provisioning.local_only"
    )]
    DeploymentUnreachable,

    #[error("deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("dependency resolution failed: {0}")]
    DependencyResolution(String),

    #[error("managed components are not supported in the container deployment profile")]
    ManagedComponentUnsupported,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ComponentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ComponentError::InvalidDescriptor { .. }
            | ComponentError::DescriptorParse(_)
            | ComponentError::InvalidCustomPipelines(_) => ErrorKind::Validation,
            ComponentError::RegistrationStatus { .. } => ErrorKind::Status,
            ComponentError::ComponentNotFound(_) => ErrorKind::NotFound,
            ComponentError::DuplicateComponent(_)
            | ComponentError::DuplicateRecord(_)
            | ComponentError::DuplicateServiceName(_)
            | ComponentError::ManagedComponentConflict(_) => ErrorKind::Duplicate,
            ComponentError::Subsystem(_) => ErrorKind::Subsystem,
            ComponentError::ManagedComponentUnsupported => ErrorKind::Unsupported,
            ComponentError::Cancelled => ErrorKind::Cancelled,
            ComponentError::NotInitialized
            | ComponentError::DeploymentUnreachable
            | ComponentError::DeploymentFailed(_)
            | ComponentError::DependencyResolution(_)
            | ComponentError::Io(_)
            | ComponentError::Yaml(_)
            | ComponentError::Json(_) => ErrorKind::Infrastructure,
        }
    }
}

pub type Result<T> = std::result::Result<T, ComponentError>;
