//! Resolve `Tools/<name>/<version>/[<os>/][<arch>/][<env>/]` trees to a directory
//! for the current platform.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DevEnvError;
use crate::platform::{Architecture, OperatingSystem, Platform, AGNOSTIC_DIR};
use crate::repository::IGNORE_AS_TOOL;

/// Prefixes tried in front of a pinned version, after the bare version
const VERSION_PREFIXES: &[&str] = &["v", "V", "r", "R"];

/// Subdirectories added to PATH instead of the tool directory when present
const BINARY_SUBDIRS: &[&str] = &["bin", "sbin", "usr/bin", "usr/sbin"];

/// A tool found under a repository's `Tools/` directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDirectory {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolLocator<'a> {
    platform: Platform,
    environment: &'a str,
}

impl<'a> ToolLocator<'a> {
    pub fn new(platform: Platform, environment: &'a str) -> Self {
        Self {
            platform,
            environment,
        }
    }

    /// Tools available in `tools_root`, sorted by name
    pub fn discover(tools_root: &Path) -> Result<Vec<ToolDirectory>> {
        if !tools_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut tools = Vec::new();
        for (name, path) in sorted_subdirs(tools_root)? {
            if path.join(IGNORE_AS_TOOL).exists() {
                tracing::debug!("ignoring {:?}", path);
                continue;
            }
            if !has_content(&path)? {
                continue;
            }
            tools.push(ToolDirectory { name, path });
        }

        Ok(tools)
    }

    /// Find the directory of `tool_dir` matching this platform.
    ///
    /// Version directories are tried in lexical order (or, with a pin, the
    /// pinned name and its prefixed spellings) and the first one that
    /// resolves for this OS and architecture wins.
    pub fn locate(&self, tool_dir: &Path, pin: Option<&str>) -> Result<PathBuf> {
        let versions = sorted_subdirs(tool_dir)?;

        let candidates: Vec<&(String, PathBuf)> = match pin {
            None => versions.iter().collect(),
            Some(pin) => std::iter::once(pin.to_string())
                .chain(VERSION_PREFIXES.iter().map(|prefix| format!("{prefix}{pin}")))
                .filter_map(|wanted| versions.iter().find(|(name, _)| *name == wanted))
                .collect(),
        };

        for (version, path) in candidates {
            if let Some(resolved) = self.resolve_version(path)? {
                tracing::debug!("resolved {:?} version {} to {:?}", tool_dir, version, resolved);
                return Ok(resolved);
            }
        }

        let tool = tool_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| tool_dir.display().to_string());

        Err(DevEnvError::ToolNotFound {
            tool,
            version: pin.unwrap_or("any").to_string(),
            os: self.platform.os.to_string(),
            arch: self.platform.arch.to_string(),
        }
        .into())
    }

    fn resolve_version(&self, version_dir: &Path) -> Result<Option<PathBuf>> {
        let mut current = version_dir.to_path_buf();

        let children = sorted_subdirs(&current)?;
        let has_os_level = children.iter().any(|(name, _)| {
            OperatingSystem::from_name(name).is_some() || name == AGNOSTIC_DIR
        });
        if has_os_level {
            let os_dir = [self.platform.os.as_str(), AGNOSTIC_DIR]
                .into_iter()
                .find_map(|wanted| children.iter().find(|(name, _)| name == wanted));
            match os_dir {
                Some((_, path)) => current = path.clone(),
                None => return Ok(None),
            }
        }

        let children = sorted_subdirs(&current)?;
        if children
            .iter()
            .any(|(name, _)| Architecture::from_name(name).is_some())
        {
            match children
                .iter()
                .find(|(name, _)| name == self.platform.arch.as_str())
            {
                Some((_, path)) => current = path.clone(),
                None => return Ok(None),
            }
        }

        let environment_dir = current.join(self.environment);
        if environment_dir.is_dir() {
            current = environment_dir;
        }

        if has_content(&current)? {
            Ok(Some(current))
        } else {
            Ok(None)
        }
    }

    /// Directories to put on PATH for a resolved tool directory
    pub fn binary_dirs(dir: &Path) -> Vec<PathBuf> {
        let found: Vec<PathBuf> = BINARY_SUBDIRS
            .iter()
            .map(|subdir| dir.join(subdir))
            .filter(|path| path.is_dir())
            .collect();

        if found.is_empty() {
            vec![dir.to_path_buf()]
        } else {
            found
        }
    }
}

/// Non-hidden subdirectories sorted by name
fn sorted_subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read directory {:?}", dir))? {
        let entry = entry.with_context(|| format!("Failed to read entry in {:?}", dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        entries.push((name, entry.path()));
    }
    entries.sort();
    Ok(entries)
}

/// Whether `dir` contains anything other than README files
fn has_content(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read directory {:?}", dir))? {
        let entry = entry.with_context(|| format!("Failed to read entry in {:?}", dir))?;
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.starts_with("readme") && !name.starts_with('.') {
            return Ok(true);
        }
    }
    Ok(false)
}
