use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Broad failure categories reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The invocation itself is not allowed (not sourced, stale setup, bad manifest)
    Precondition,
    /// The request conflicts with the environment already active in this shell
    StateConflict,
    /// Something that should exist on disk or in the shell does not
    MissingArtifact,
    /// A command run on behalf of the repository failed
    ExternalTool,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Precondition => write!(f, "precondition"),
            ErrorKind::StateConflict => write!(f, "state conflict"),
            ErrorKind::MissingArtifact => write!(f, "missing artifact"),
            ErrorKind::ExternalTool => write!(f, "external tool"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DevEnvError {
    #[error("This script must be sourced (for example `. {script}`) so that it can modify the current shell")]
    NotSourced { script: String },

    #[error("The environment '{environment}' has not been set up for {repository:?}; run Setup first (expected {record:?})")]
    NotSetUp {
        repository: PathBuf,
        environment: String,
        record: PathBuf,
    },

    #[error("The repository {repository:?} has changed since it was set up ({changed}); run Setup again")]
    StaleSetup { repository: PathBuf, changed: String },

    #[error("Invalid manifest {path:?}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Another repository is already active in this shell ({active:?}); deactivate it before activating {requested:?}")]
    RepositoryConflict { active: PathBuf, requested: PathBuf },

    #[error("The environment '{active}' is active in this shell; it does not match the requested environment '{requested}'")]
    EnvironmentConflict { active: String, requested: String },

    #[error("The mixin repository {repository:?} can only be activated on top of an already active repository")]
    MixinWithoutBase { repository: PathBuf },

    #[error("A configuration must be specified; available configurations: {}", .available.join(", "))]
    ConfigurationRequired { available: Vec<String> },

    #[error("The configuration '{name}' is not valid; available configurations: {}", .available.join(", "))]
    UnknownConfiguration { name: String, available: Vec<String> },

    #[error("The repository {repository:?} does not support configurations (received '{configuration}')")]
    NotConfigurable {
        repository: PathBuf,
        configuration: String,
    },

    #[error("The configuration '{requested}' does not match the active configuration '{active}'")]
    ConfigurationMismatch { active: String, requested: String },

    #[error("The dependency '{name}' is required with both the '{first}' and '{second}' configurations")]
    DependencyConfigurationConflict {
        name: String,
        first: String,
        second: String,
    },

    #[error("No development environment is active in this shell")]
    NoActiveEnvironment,

    #[error("State created during activation could not be found ({path:?})")]
    MissingActivationState { path: PathBuf },

    #[error("Tool '{tool}' (version {version}) is not available for {os}/{arch}")]
    ToolNotFound {
        tool: String,
        version: String,
        os: String,
        arch: String,
    },

    #[error("The dependency '{name}' ({id}) required by '{dependent}' could not be found")]
    DependencyNotFound {
        id: String,
        name: String,
        dependent: String,
    },

    #[error("The command `{command}` failed ({})", .status.map(|code| format!("exit code {code}")).unwrap_or_else(|| "terminated by signal".to_string()))]
    ExternalCommand { command: String, status: Option<i32> },
}

impl DevEnvError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DevEnvError::NotSourced { .. }
            | DevEnvError::StaleSetup { .. }
            | DevEnvError::InvalidManifest { .. }
            | DevEnvError::NotConfigurable { .. }
            | DevEnvError::ConfigurationRequired { .. }
            | DevEnvError::UnknownConfiguration { .. } => ErrorKind::Precondition,

            DevEnvError::RepositoryConflict { .. }
            | DevEnvError::EnvironmentConflict { .. }
            | DevEnvError::MixinWithoutBase { .. }
            | DevEnvError::ConfigurationMismatch { .. }
            | DevEnvError::DependencyConfigurationConflict { .. } => ErrorKind::StateConflict,

            DevEnvError::NotSetUp { .. }
            | DevEnvError::NoActiveEnvironment
            | DevEnvError::MissingActivationState { .. }
            | DevEnvError::ToolNotFound { .. }
            | DevEnvError::DependencyNotFound { .. } => ErrorKind::MissingArtifact,

            DevEnvError::ExternalCommand { .. } => ErrorKind::ExternalTool,
        }
    }
}
