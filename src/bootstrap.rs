use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DevEnvError;
use crate::manifest;

/// Line-oriented `key=value` record read by the wrapper scripts and tools
pub const DATA_FILE: &str = "EnvironmentBootstrap.data";

/// Complete setup record
pub const RECORD_FILE: &str = "EnvironmentBootstrap.toml";

const RECORD_VERSION: u32 = 1;

/// A repository resolved during setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRepository {
    pub id: String,
    pub name: String,
    pub root: PathBuf,
    /// Configuration of this repository to activate, if it is configurable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(default)]
    pub is_mixin: bool,
}

/// What a single configuration resolved to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    #[serde(default)]
    pub description: String,
    /// Pinned tool versions
    #[serde(default)]
    pub tools: BTreeMap<String, String>,
    /// Dependencies in activation order, the repository itself excluded
    #[serde(default)]
    pub repositories: Vec<ResolvedRepository>,
}

/// Result of Setup for one environment name, stored under
/// `Generated/<os>/<environment>/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentBootstrap {
    version: u32,
    pub created_at: String,
    pub name: String,
    pub id: String,
    pub environment: String,
    pub foundation_repo: PathBuf,
    pub is_mixin_repo: bool,
    pub is_configurable: bool,
    /// Manifest path to sha256 at setup time
    #[serde(default)]
    pub fingerprints: BTreeMap<String, String>,
    #[serde(default)]
    pub configurations: BTreeMap<String, ConfigurationRecord>,
}

/// The three fields carried by the `.data` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapData {
    pub foundation_repo: PathBuf,
    pub is_mixin_repo: bool,
    pub is_configurable: bool,
}

impl BootstrapData {
    pub fn render(&self) -> String {
        format!(
            "foundation_repo={}\nis_mixin_repo={}\nis_configurable={}\n",
            self.foundation_repo.display(),
            u8::from(self.is_mixin_repo),
            u8::from(self.is_configurable)
        )
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut values = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| anyhow!("Malformed line '{}'", line))?;
            values.insert(key.trim(), value.trim());
        }

        let flag = |key: &str| -> Result<bool> {
            match values.get(key).copied() {
                Some("1") => Ok(true),
                Some("0") => Ok(false),
                Some(other) => Err(anyhow!("Invalid value '{}' for '{}'", other, key)),
                None => Err(anyhow!("Missing '{}'", key)),
            }
        };

        Ok(Self {
            foundation_repo: values
                .get("foundation_repo")
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("Missing 'foundation_repo'"))?,
            is_mixin_repo: flag("is_mixin_repo")?,
            is_configurable: flag("is_configurable")?,
        })
    }
}

impl EnvironmentBootstrap {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        environment: impl Into<String>,
        foundation_repo: PathBuf,
        is_mixin_repo: bool,
        is_configurable: bool,
    ) -> Self {
        Self {
            version: RECORD_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            name: name.into(),
            id: id.into(),
            environment: environment.into(),
            foundation_repo,
            is_mixin_repo,
            is_configurable,
            fingerprints: BTreeMap::new(),
            configurations: BTreeMap::new(),
        }
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(DATA_FILE).is_file() && dir.join(RECORD_FILE).is_file()
    }

    /// Load the record from `dir`; the `.data` file is authoritative for the
    /// fields it carries.
    pub fn load(dir: &Path) -> Result<Self> {
        let data_path = dir.join(DATA_FILE);
        let data = fs::read_to_string(&data_path)
            .with_context(|| format!("Failed to read {:?}", data_path))?;
        let data = BootstrapData::parse(&data)
            .with_context(|| format!("Failed to parse {:?}", data_path))?;

        let record_path = dir.join(RECORD_FILE);
        let contents = fs::read_to_string(&record_path)
            .with_context(|| format!("Failed to read {:?}", record_path))?;
        let mut record: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {:?}", record_path))?;

        record.foundation_repo = data.foundation_repo;
        record.is_mixin_repo = data.is_mixin_repo;
        record.is_configurable = data.is_configurable;
        Ok(record)
    }

    /// Save both files, creating `dir` if needed
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {:?}", dir))?;

        let data_path = dir.join(DATA_FILE);
        fs::write(&data_path, self.data().render())
            .with_context(|| format!("Failed to write {:?}", data_path))?;

        let record_path = dir.join(RECORD_FILE);
        let contents = toml::to_string_pretty(self).context("Failed to serialize setup record")?;
        fs::write(&record_path, contents)
            .with_context(|| format!("Failed to write {:?}", record_path))?;

        Ok(())
    }

    pub fn data(&self) -> BootstrapData {
        BootstrapData {
            foundation_repo: self.foundation_repo.clone(),
            is_mixin_repo: self.is_mixin_repo,
            is_configurable: self.is_configurable,
        }
    }

    pub fn add_configuration(&mut self, name: impl Into<String>, record: ConfigurationRecord) {
        self.configurations.insert(name.into(), record);
    }

    pub fn configuration(&self, name: &str) -> Result<&ConfigurationRecord, DevEnvError> {
        self.configurations
            .get(name)
            .ok_or_else(|| DevEnvError::UnknownConfiguration {
                name: name.to_string(),
                available: self.configuration_names(),
            })
    }

    pub fn configuration_names(&self) -> Vec<String> {
        self.configurations.keys().cloned().collect()
    }

    /// Record the current manifest fingerprint of `repository`
    pub fn record_fingerprint(&mut self, repository: &Path) -> Result<()> {
        let fingerprint = manifest::fingerprint(repository)?;
        self.fingerprints.insert(
            manifest::Manifest::path_for(repository)
                .to_string_lossy()
                .into_owned(),
            fingerprint,
        );
        Ok(())
    }

    /// Manifests that changed or disappeared since setup
    pub fn stale_manifests(&self) -> Vec<PathBuf> {
        self.fingerprints
            .iter()
            .filter_map(|(path, expected)| {
                let path = PathBuf::from(path);
                match manifest::fingerprint_file(&path).ok() {
                    Some(current) if current == *expected => None,
                    _ => Some(path),
                }
            })
            .collect()
    }
}
