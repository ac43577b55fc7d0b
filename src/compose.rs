//! Build the PATH, library and auxiliary variable values for an ordered set
//! of repositories.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

use crate::error::DevEnvError;
use crate::manifest::Manifest;
use crate::platform::Platform;
use crate::repository::{Repository, RepositoryPath};
use crate::tools::ToolLocator;

static TOKEN: OnceLock<Regex> = OnceLock::new();

/// One repository's contribution, in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeInput {
    pub root: PathBuf,
    pub name: String,
    pub is_mixin: bool,
    /// Auxiliary variables (repository-wide merged with its configuration)
    pub variables: BTreeMap<String, String>,
}

/// Inputs shared by every repository in a composition
#[derive(Debug, Clone, Copy)]
pub struct ComposeRequest<'a> {
    pub platform: Platform,
    pub environment: &'a str,
    /// Tool name to pinned version, from the activated configuration
    pub pins: &'a BTreeMap<String, String>,
    /// `Libraries/<Language>` to variable name
    pub library_variables: &'a BTreeMap<String, String>,
}

/// The environment an activation contributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composition {
    pub path: Vec<PathBuf>,
    pub libraries: BTreeMap<String, Vec<PathBuf>>,
    pub variables: BTreeMap<String, String>,
    pub tools: BTreeMap<String, PathBuf>,
}

/// Compose the environment for `repositories`, highest priority first.
///
/// When two repositories provide the same tool, library or variable the
/// earlier one wins and the later one is skipped.
pub fn compose(repositories: &[ComposeInput], request: ComposeRequest<'_>) -> Result<Composition> {
    let locator = ToolLocator::new(request.platform, request.environment);
    let mut composition = Composition::default();

    for repository in repositories {
        if !repository.is_mixin {
            let tools_root = Repository::path_in(&repository.root, RepositoryPath::Tools);
            for tool in ToolLocator::discover(&tools_root)? {
                if composition.tools.contains_key(&tool.name) {
                    tracing::debug!("{} from {} is shadowed", tool.name, repository.name);
                    continue;
                }

                let pin = request.pins.get(&tool.name).map(String::as_str);
                let resolved = locator
                    .locate(&tool.path, pin)
                    .with_context(|| format!("While resolving tools for '{}'", repository.name))?;

                composition.path.extend(ToolLocator::binary_dirs(&resolved));
                composition.tools.insert(tool.name, resolved);
            }
        }

        let scripts = Repository::path_in(&repository.root, RepositoryPath::Scripts);
        composition.path.extend(script_dirs(&scripts));
    }

    for pinned in request.pins.keys() {
        if !composition.tools.contains_key(pinned) {
            tracing::warn!("pinned tool '{}' was not found in any repository", pinned);
        }
    }

    let mut seen_libraries = HashSet::new();
    for repository in repositories {
        let libraries = Repository::path_in(&repository.root, RepositoryPath::Libraries);
        for (language, name, path) in library_dirs(&libraries) {
            let Some(variable) = request.library_variables.get(&language) else {
                tracing::debug!("no variable for {} libraries; skipping {:?}", language, path);
                continue;
            };
            if seen_libraries.insert((language, name)) {
                composition
                    .libraries
                    .entry(variable.clone())
                    .or_default()
                    .push(path);
            }
        }
    }

    for repository in repositories {
        for (name, template) in &repository.variables {
            if composition.variables.contains_key(name) {
                continue;
            }
            let value = substitute(template, repository, &composition.tools, request)?;
            composition.variables.insert(name.clone(), value);
        }
    }

    dedup(&mut composition.path);
    for entries in composition.libraries.values_mut() {
        dedup(entries);
    }

    Ok(composition)
}

fn dedup(entries: &mut Vec<PathBuf>) {
    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.clone()));
}

fn skip_dir(name: &str) -> bool {
    name.starts_with('.') || name == "__pycache__"
}

/// `Scripts/` plus every descendant directory that directly contains a file
fn script_dirs(scripts: &Path) -> Vec<PathBuf> {
    if !scripts.is_dir() {
        return Vec::new();
    }

    let mut dirs = vec![scripts.to_path_buf()];
    let mut with_files = BTreeSet::new();

    let walker = WalkDir::new(scripts)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir() && skip_dir(&entry.file_name().to_string_lossy()))
        });

    for entry in walker.filter_map(|entry| entry.ok()) {
        if entry.file_type().is_file() {
            if let Some(parent) = entry.path().parent() {
                if parent != scripts {
                    with_files.insert(parent.to_path_buf());
                }
            }
        }
    }

    dirs.extend(with_files);
    dirs
}

/// `(language, library, path)` for `Libraries/<Language>/<Library>[/src]`
fn library_dirs(libraries: &Path) -> Vec<(String, String, PathBuf)> {
    let mut found = Vec::new();

    for language in WalkDir::new(libraries)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
    {
        let language_name = language.file_name().to_string_lossy().into_owned();
        if skip_dir(&language_name) {
            continue;
        }

        for library in WalkDir::new(language.path())
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
        {
            let library_name = library.file_name().to_string_lossy().into_owned();
            if skip_dir(&library_name) {
                continue;
            }

            let src = library.path().join("src");
            let path = if src.is_dir() {
                src
            } else {
                library.path().to_path_buf()
            };
            found.push((language_name.clone(), library_name, path));
        }
    }

    found
}

/// Expand `${repo}`, `${os}`, `${arch}`, `${env_name}` and `${tool:<name>}`
fn substitute(
    template: &str,
    repository: &ComposeInput,
    tools: &BTreeMap<String, PathBuf>,
    request: ComposeRequest<'_>,
) -> Result<String> {
    let token = TOKEN.get_or_init(|| {
        Regex::new(r"\$\{([a-z_]+)(?::([^}]+))?\}").expect("variable token regex")
    });

    let mut failure: Option<DevEnvError> = None;
    let expanded = token.replace_all(template, |captures: &Captures<'_>| {
        let key = &captures[1];
        let argument = captures.get(2).map(|m| m.as_str());
        let value = match (key, argument) {
            ("repo", None) => Some(repository.root.to_string_lossy().into_owned()),
            ("os", None) => Some(request.platform.os.to_string()),
            ("arch", None) => Some(request.platform.arch.to_string()),
            ("env_name", None) => Some(request.environment.to_string()),
            ("tool", Some(name)) => match tools.get(name) {
                Some(path) => Some(path.to_string_lossy().into_owned()),
                None => {
                    failure.get_or_insert(DevEnvError::ToolNotFound {
                        tool: name.to_string(),
                        version: request
                            .pins
                            .get(name)
                            .cloned()
                            .unwrap_or_else(|| "any".to_string()),
                        os: request.platform.os.to_string(),
                        arch: request.platform.arch.to_string(),
                    });
                    None
                }
            },
            _ => {
                failure.get_or_insert(DevEnvError::InvalidManifest {
                    path: Manifest::path_for(&repository.root),
                    message: format!("unknown variable token '{}'", &captures[0]),
                });
                None
            }
        };
        value.unwrap_or_default()
    });

    match failure {
        Some(err) => Err(err.into()),
        None => Ok(expanded.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Architecture, OperatingSystem};
    use std::fs;
    use tempfile::TempDir;

    const LINUX_X64: Platform = Platform::new(OperatingSystem::Linux, Architecture::X64);

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn input(root: &Path, name: &str) -> ComposeInput {
        ComposeInput {
            root: root.to_path_buf(),
            name: name.to_string(),
            is_mixin: false,
            variables: BTreeMap::new(),
        }
    }

    fn library_variables() -> BTreeMap<String, String> {
        BTreeMap::from([("Python".to_string(), "PYTHONPATH".to_string())])
    }

    #[test]
    fn test_target_precedes_dependencies() {
        let target = TempDir::new().unwrap();
        let dependency = TempDir::new().unwrap();
        touch(&target.path().join("Scripts/build.sh"));
        touch(&target.path().join("Tools/Python/3.11/Linux/x64/bin/python3"));
        touch(&dependency.path().join("Scripts/lint.sh"));
        touch(&dependency.path().join("Tools/Python/3.9/Linux/x64/bin/python3"));
        touch(&dependency.path().join("Tools/Cmake/3.22/Linux/x64/bin/cmake"));

        let pins = BTreeMap::new();
        let libraries = library_variables();
        let request = ComposeRequest {
            platform: LINUX_X64,
            environment: "DefaultEnv",
            pins: &pins,
            library_variables: &libraries,
        };

        let composition = compose(
            &[input(target.path(), "Target"), input(dependency.path(), "Dep")],
            request,
        )
        .unwrap();

        assert_eq!(
            composition.path,
            vec![
                target.path().join("Tools/Python/3.11/Linux/x64/bin"),
                target.path().join("Scripts"),
                dependency.path().join("Tools/Cmake/3.22/Linux/x64/bin"),
                dependency.path().join("Scripts"),
            ]
        );
        assert_eq!(
            composition.tools["Python"],
            target.path().join("Tools/Python/3.11/Linux/x64")
        );
    }

    #[test]
    fn test_scripts_descendants_and_dedup() {
        let repo = TempDir::new().unwrap();
        touch(&repo.path().join("Scripts/a/tool.sh"));
        touch(&repo.path().join("Scripts/a/b/other.sh"));
        touch(&repo.path().join("Scripts/empty/.keep"));
        touch(&repo.path().join("Scripts/__pycache__/x.pyc"));
        fs::create_dir_all(repo.path().join("Scripts/nothing")).unwrap();

        let pins = BTreeMap::new();
        let libraries = library_variables();
        let request = ComposeRequest {
            platform: LINUX_X64,
            environment: "DefaultEnv",
            pins: &pins,
            library_variables: &libraries,
        };

        let repositories = [input(repo.path(), "Repo"), input(repo.path(), "Repo")];
        let composition = compose(&repositories, request).unwrap();
        assert_eq!(
            composition.path,
            vec![
                repo.path().join("Scripts"),
                repo.path().join("Scripts/a"),
                repo.path().join("Scripts/a/b"),
                repo.path().join("Scripts/empty"),
            ]
        );
    }

    #[test]
    fn test_libraries_and_variables() {
        let target = TempDir::new().unwrap();
        let dependency = TempDir::new().unwrap();
        touch(&target.path().join("Libraries/Python/Alpha/src/alpha/__init__.py"));
        touch(&dependency.path().join("Libraries/Python/Beta/beta.py"));
        touch(&dependency.path().join("Libraries/Cobol/Gamma/g.cbl"));
        touch(&target.path().join("Tools/Node/20.1.0/Linux/x64/bin/node"));

        let mut target_input = input(target.path(), "Target");
        target_input
            .variables
            .insert("NODE_HOME".into(), "${tool:Node}".into());
        target_input
            .variables
            .insert("SHARED".into(), "${repo}/${os}-${arch}/${env_name}".into());
        let mut dependency_input = input(dependency.path(), "Dep");
        dependency_input
            .variables
            .insert("SHARED".into(), "dependency".into());

        let pins = BTreeMap::from([("Node".to_string(), "20.1.0".to_string())]);
        let libraries = library_variables();
        let request = ComposeRequest {
            platform: LINUX_X64,
            environment: "ci",
            pins: &pins,
            library_variables: &libraries,
        };

        let composition = compose(&[target_input, dependency_input], request).unwrap();

        assert_eq!(
            composition.libraries["PYTHONPATH"],
            vec![
                target.path().join("Libraries/Python/Alpha/src"),
                dependency.path().join("Libraries/Python/Beta"),
            ]
        );
        assert_eq!(composition.libraries.len(), 1);
        assert_eq!(
            composition.variables["SHARED"],
            format!("{}/Linux-x64/ci", target.path().display())
        );
        assert_eq!(
            composition.variables["NODE_HOME"],
            target.path().join("Tools/Node/20.1.0/Linux/x64").to_string_lossy()
        );
    }

    #[test]
    fn test_mixin_contributes_scripts_only() {
        let mixin = TempDir::new().unwrap();
        touch(&mixin.path().join("Scripts/extra.sh"));
        touch(&mixin.path().join("Tools/Go/1.21/Linux/x64/bin/go"));

        let mut mixin_input = input(mixin.path(), "Mixin");
        mixin_input.is_mixin = true;

        let pins = BTreeMap::new();
        let libraries = library_variables();
        let request = ComposeRequest {
            platform: LINUX_X64,
            environment: "DefaultEnv",
            pins: &pins,
            library_variables: &libraries,
        };

        let composition = compose(&[mixin_input], request).unwrap();
        assert_eq!(composition.path, vec![mixin.path().join("Scripts")]);
        assert!(composition.tools.is_empty());
    }

    #[test]
    fn test_unknown_token_is_rejected() {
        let repo = TempDir::new().unwrap();
        let mut repo_input = input(repo.path(), "Repo");
        repo_input.variables.insert("X".into(), "${home}".into());

        let pins = BTreeMap::new();
        let libraries = library_variables();
        let request = ComposeRequest {
            platform: LINUX_X64,
            environment: "DefaultEnv",
            pins: &pins,
            library_variables: &libraries,
        };

        let err = compose(&[repo_input], request).unwrap_err();
        assert!(err.to_string().contains("unknown variable token '${home}'"));
    }
}
