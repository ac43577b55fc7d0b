use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::util::xdg;

const SETTINGS_FILE: &str = "config.toml";
const DEFAULT_SEARCH_DEPTH: usize = 6;

/// Library languages understood out of the box and the variable each one feeds
const DEFAULT_LIBRARY_VARIABLES: &[(&str, &str)] = &[
    ("Perl", "PERL5LIB"),
    ("Python", "PYTHONPATH"),
    ("Ruby", "RUBYLIB"),
];

/// User settings read from `$XDG_CONFIG_HOME/devenv/config.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Levels below each search root examined when looking for dependencies
    #[serde(default = "default_search_depth")]
    pub search_depth: usize,
    /// Upper bound on directories examined while looking for dependencies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_searches: Option<usize>,
    /// Extra roots searched for dependencies (`~` and `$VAR` are expanded)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_search_dirs: Vec<String>,
    /// `Libraries/<Language>` directory name to environment variable
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            search_depth: DEFAULT_SEARCH_DEPTH,
            max_num_searches: None,
            additional_search_dirs: Vec::new(),
            libraries: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn default_path() -> Result<PathBuf> {
        Ok(xdg::config_dir()?.join(SETTINGS_FILE))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path()?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents =
            toml::to_string_pretty(self).context("Failed to serialize devenv config file")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {:?}", path))?;
        Ok(())
    }

    /// Additional search roots with `~` and environment variables expanded
    pub fn search_dirs(&self) -> Result<Vec<PathBuf>> {
        self.additional_search_dirs
            .iter()
            .map(|dir| {
                shellexpand::full(dir)
                    .map(|expanded| PathBuf::from(expanded.as_ref()))
                    .with_context(|| format!("Failed to expand search directory '{}'", dir))
            })
            .collect()
    }

    /// Built-in language mappings overlaid with the user's
    pub fn library_variables(&self) -> BTreeMap<String, String> {
        let mut variables: BTreeMap<String, String> = DEFAULT_LIBRARY_VARIABLES
            .iter()
            .map(|(language, variable)| (language.to_string(), variable.to_string()))
            .collect();
        variables.extend(
            self.libraries
                .iter()
                .map(|(language, variable)| (language.clone(), variable.clone())),
        );
        variables
    }
}

fn default_search_depth() -> usize {
    DEFAULT_SEARCH_DEPTH
}
