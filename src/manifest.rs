use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::DevEnvError;

/// File at the root of every repository describing how it is set up
pub const MANIFEST_FILE: &str = "Bootstrap.toml";

/// Name of the implicit configuration of a non-configurable repository
pub const DEFAULT_CONFIGURATION: &str = "DefaultConfig";

/// Another repository this one requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Unique id declared in the dependency's own manifest
    pub id: String,
    /// Friendly name used in messages and as the clone directory name
    pub name: String,
    /// Configuration of the dependency to activate, if it is configurable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    /// Git URL or GitHub shorthand used by `devenv bootstrap`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_uri: Option<String>,
}

/// A named variant of a configurable repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencySpec>,
    /// Tool name to pinned version directory
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

/// Contents of a repository's `Bootstrap.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub id: String,
    /// Mixin repositories layer scripts on top of an already active repository
    #[serde(default)]
    pub mixin: bool,
    /// Commands run from the repository root during setup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup_commands: Vec<String>,
    /// Auxiliary variables contributed regardless of configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Git hook name to command line
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<String, String>,
    /// Dependencies shared by every configuration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configurations: BTreeMap<String, ConfigurationSpec>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, toml::Value>,
}

/// Everything a single configuration contributes, with repository-wide
/// values merged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfiguration {
    pub name: String,
    pub description: String,
    pub dependencies: Vec<DependencySpec>,
    pub tools: BTreeMap<String, String>,
    pub variables: BTreeMap<String, String>,
}

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

fn hook_name_regex() -> &'static Regex {
    static HOOK: OnceLock<Regex> = OnceLock::new();
    HOOK.get_or_init(|| Regex::new(r"^[a-z][a-z-]*$").expect("valid regex"))
}

impl Manifest {
    pub fn path_for(repository: &Path) -> PathBuf {
        repository.join(MANIFEST_FILE)
    }

    /// Load and validate the manifest at the root of `repository`
    pub fn load_from_repository(repository: &Path) -> Result<Self> {
        Self::load(&Self::path_for(repository))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest file {:?}", path))?;

        let manifest: Manifest = toml::from_str(&contents).map_err(|err| {
            DevEnvError::InvalidManifest {
                path: path.to_path_buf(),
                message: err.message().to_string(),
            }
        })?;

        manifest.validate(path)?;
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize manifest")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write manifest file {:?}", path))?;
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<(), DevEnvError> {
        let invalid = |message: String| DevEnvError::InvalidManifest {
            path: path.to_path_buf(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("'name' must not be empty".into()));
        }
        if self.id.trim().is_empty() {
            return Err(invalid("'id' must not be empty".into()));
        }

        if self.mixin {
            if !self.dependencies.is_empty() {
                return Err(invalid("mixin repositories cannot have dependencies".into()));
            }
            if !self.configurations.is_empty() {
                return Err(invalid("mixin repositories cannot have configurations".into()));
            }
        }

        if self.configurations.contains_key(DEFAULT_CONFIGURATION) {
            return Err(invalid(format!(
                "'{DEFAULT_CONFIGURATION}' is reserved and cannot be used as a configuration name"
            )));
        }

        let configuration_variables = self
            .configurations
            .values()
            .flat_map(|configuration| configuration.variables.keys());
        for name in self.variables.keys().chain(configuration_variables) {
            if !identifier_regex().is_match(name) {
                return Err(invalid(format!("'{name}' is not a valid variable name")));
            }
            if name.starts_with("DEVELOPMENT_ENVIRONMENT_") || name == "PATH" {
                return Err(invalid(format!("'{name}' is managed by devenv")));
            }
        }

        for hook in self.hooks.keys() {
            if !hook_name_regex().is_match(hook) {
                return Err(invalid(format!("'{hook}' is not a valid git hook name")));
            }
        }

        let dependencies = self.configurations.values().flat_map(|c| c.dependencies.iter());
        for dependency in self.dependencies.iter().chain(dependencies) {
            if dependency.id == self.id {
                return Err(invalid(format!(
                    "the repository cannot depend on itself ('{}')",
                    dependency.name
                )));
            }
        }

        Ok(())
    }

    pub fn is_configurable(&self) -> bool {
        !self.configurations.is_empty()
    }

    pub fn configuration_names(&self) -> Vec<String> {
        self.configurations.keys().cloned().collect()
    }

    /// Configurations Setup records: every declared one unless a subset was requested
    pub fn configurations_for_setup(
        &self,
        repository: &Path,
        requested: &[String],
    ) -> Result<Vec<String>, DevEnvError> {
        if !self.is_configurable() {
            if let Some(name) = requested.first() {
                return Err(DevEnvError::NotConfigurable {
                    repository: repository.to_path_buf(),
                    configuration: name.clone(),
                });
            }
            return Ok(vec![DEFAULT_CONFIGURATION.to_string()]);
        }

        if requested.is_empty() {
            return Ok(self.configuration_names());
        }

        let mut names = Vec::new();
        for name in requested {
            if !self.configurations.contains_key(name) {
                return Err(DevEnvError::UnknownConfiguration {
                    name: name.clone(),
                    available: self.configuration_names(),
                });
            }
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        Ok(names)
    }

    /// Merge the repository-wide settings with the named configuration.
    ///
    /// `None` and [`DEFAULT_CONFIGURATION`] select the implicit configuration
    /// of a non-configurable repository.
    pub fn resolve_configuration(
        &self,
        repository: &Path,
        name: Option<&str>,
    ) -> Result<ResolvedConfiguration, DevEnvError> {
        let mut resolved = ResolvedConfiguration {
            name: DEFAULT_CONFIGURATION.to_string(),
            description: String::new(),
            dependencies: self.dependencies.clone(),
            tools: BTreeMap::new(),
            variables: self.variables.clone(),
        };

        let name = name.filter(|name| *name != DEFAULT_CONFIGURATION);

        match (self.is_configurable(), name) {
            (false, None) => Ok(resolved),
            (false, Some(name)) => Err(DevEnvError::NotConfigurable {
                repository: repository.to_path_buf(),
                configuration: name.to_string(),
            }),
            (true, None) => Err(DevEnvError::ConfigurationRequired {
                available: self.configuration_names(),
            }),
            (true, Some(name)) => {
                let spec = self.configurations.get(name).ok_or_else(|| {
                    DevEnvError::UnknownConfiguration {
                        name: name.to_string(),
                        available: self.configuration_names(),
                    }
                })?;

                resolved.name = name.to_string();
                resolved.description = spec.description.clone();
                resolved.dependencies.extend(spec.dependencies.iter().cloned());
                resolved.tools = spec.tools.clone();
                resolved
                    .variables
                    .extend(spec.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(resolved)
            }
        }
    }
}

/// sha256 of the manifest file, used to detect repositories changed since setup
pub fn fingerprint(repository: &Path) -> Result<String> {
    fingerprint_file(&Manifest::path_for(repository))
}

pub fn fingerprint_file(path: &Path) -> Result<String> {
    let contents =
        fs::read(path).with_context(|| format!("Failed to read manifest file {:?}", path))?;
    Ok(hex::encode(Sha256::digest(&contents)))
}
