//! Setup: resolve a repository's dependencies and write everything
//! activation needs under `Generated/<os>/<environment>/`.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bootstrap::{ConfigurationRecord, EnvironmentBootstrap, ResolvedRepository};
use crate::discovery::{Discovery, FoundRepository, SearchOptions};
use crate::error::DevEnvError;
use crate::manifest::{DependencySpec, Manifest, DEFAULT_CONFIGURATION};
use crate::platform::Platform;
use crate::repository::{self, Repository};
use crate::ui;

#[derive(Debug, Clone)]
pub struct SetupOptions {
    pub repository: PathBuf,
    /// Configurations to record; empty means all of them
    pub configurations: Vec<String>,
    pub environment: String,
    pub force: bool,
    pub no_hooks: bool,
    pub platform: Platform,
    /// The devenv binary the wrappers invoke
    pub binary: PathBuf,
    /// Foundation repository; defaults to the repository itself
    pub foundation: Option<PathBuf>,
    pub search: SearchOptions,
    /// Searched after the repository root
    pub additional_search_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// A record already existed and `force` was not set
    AlreadySetUp(PathBuf),
    Completed(PathBuf),
}

/// Set up `options.repository` for `options.environment`
pub fn run(options: &SetupOptions) -> Result<SetupOutcome> {
    let repository = Repository::open(&options.repository)?;
    let manifest = repository.manifest();
    let configurations =
        manifest.configurations_for_setup(repository.root(), &options.configurations)?;

    let dir = Repository::environment_dir(
        repository.root(),
        options.platform.os,
        &options.environment,
    );
    if EnvironmentBootstrap::exists(&dir) && !options.force {
        tracing::info!("{:?} already set up", dir);
        return Ok(SetupOutcome::AlreadySetUp(dir));
    }

    let foundation = match &options.foundation {
        Some(foundation) => foundation
            .canonicalize()
            .unwrap_or_else(|_| foundation.clone()),
        None => repository.root().to_path_buf(),
    };

    let mut record = EnvironmentBootstrap::new(
        &manifest.name,
        &manifest.id,
        &options.environment,
        foundation,
        manifest.mixin,
        manifest.is_configurable(),
    );

    let mut resolver = Resolver::new(&repository, options);
    for name in &configurations {
        let configuration = (name != DEFAULT_CONFIGURATION).then_some(name.as_str());
        let resolved = manifest.resolve_configuration(repository.root(), configuration)?;
        let repositories = resolver
            .resolve(&resolved.dependencies)
            .with_context(|| format!("Failed to resolve dependencies of '{}'", name))?;

        record.add_configuration(
            name.clone(),
            ConfigurationRecord {
                description: resolved.description,
                tools: resolved.tools,
                repositories,
            },
        );
    }

    repository.run_setup_commands(options.platform.os)?;

    let wrappers =
        repository.write_wrappers(options.platform.os, &options.environment, &options.binary)?;
    for wrapper in &wrappers {
        tracing::info!("wrote {:?}", wrapper);
    }

    if !options.no_hooks {
        for hook in repository.install_hooks()? {
            tracing::info!("installed hook {:?}", hook);
        }
    }

    record.record_fingerprint(repository.root())?;
    let dependency_roots: BTreeSet<PathBuf> = record
        .configurations
        .values()
        .flat_map(|configuration| configuration.repositories.iter())
        .map(|dependency| dependency.root.clone())
        .collect();
    for root in &dependency_roots {
        record.record_fingerprint(root)?;
    }

    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
    record.save(&dir)?;

    Ok(SetupOutcome::Completed(dir))
}

/// Breadth-first resolution of dependency specs against the file system
struct Resolver<'a> {
    repository: &'a Repository,
    discovery: Discovery,
    roots: Vec<PathBuf>,
    found: BTreeMap<String, FoundRepository>,
}

impl<'a> Resolver<'a> {
    fn new(repository: &'a Repository, options: &SetupOptions) -> Self {
        let mut roots = vec![repository.root().to_path_buf()];
        roots.extend(options.additional_search_dirs.iter().cloned());

        Self {
            repository,
            discovery: Discovery::new(options.search.clone()),
            roots,
            found: BTreeMap::new(),
        }
    }

    /// Transitive dependencies of one configuration in activation order
    fn resolve(&mut self, direct: &[DependencySpec]) -> Result<Vec<ResolvedRepository>> {
        let repository = self.repository;
        let own_id = &repository.manifest().id;
        let mut queue: VecDeque<(DependencySpec, String)> = direct
            .iter()
            .map(|spec| (spec.clone(), repository.name().to_string()))
            .collect();
        let mut resolved: Vec<ResolvedRepository> = Vec::new();

        while let Some((spec, dependent)) = queue.pop_front() {
            if spec.id == *own_id {
                continue;
            }

            if let Some(existing) = resolved.iter().find(|r| r.id == spec.id) {
                let requested = spec.configuration.as_deref();
                if let (Some(first), Some(second)) = (existing.configuration.as_deref(), requested)
                {
                    if first != second {
                        return Err(DevEnvError::DependencyConfigurationConflict {
                            name: existing.name.clone(),
                            first: first.to_string(),
                            second: second.to_string(),
                        }
                        .into());
                    }
                }
                continue;
            }

            let found = self.locate(&spec, &dependent)?;
            if found.manifest.mixin {
                return Err(DevEnvError::InvalidManifest {
                    path: Manifest::path_for(repository.root()),
                    message: format!(
                        "'{}' is a mixin repository and cannot be a dependency",
                        found.manifest.name
                    ),
                }
                .into());
            }

            let configuration = found
                .manifest
                .resolve_configuration(&found.root, spec.configuration.as_deref())
                .with_context(|| format!("Invalid dependency '{}'", spec.name))?;

            tracing::debug!("'{}' depends on '{}' at {:?}", dependent, spec.name, found.root);
            queue.extend(
                configuration
                    .dependencies
                    .into_iter()
                    .map(|dependency| (dependency, found.manifest.name.clone())),
            );
            resolved.push(ResolvedRepository {
                id: found.manifest.id.clone(),
                name: found.manifest.name.clone(),
                root: found.root.clone(),
                configuration: found
                    .manifest
                    .is_configurable()
                    .then(|| configuration.name.clone()),
                is_mixin: false,
            });
        }

        Ok(resolved)
    }

    fn locate(&mut self, spec: &DependencySpec, dependent: &str) -> Result<FoundRepository> {
        if !self.found.contains_key(&spec.id) {
            let wanted = BTreeSet::from([spec.id.clone()]);
            let step = ui::Step::start("Searching", format!("for '{}'", spec.name));
            let found = self.discovery.find(&self.roots, &wanted)?;
            match found.get(&spec.id) {
                Some(repository) => {
                    step.done("Found", Some(&repository.root.display().to_string()))
                }
                None => step.failed("Missing", &spec.name),
            }
            self.found.extend(found);
        }

        let found = self.found.get(&spec.id).ok_or_else(|| DevEnvError::DependencyNotFound {
            id: spec.id.clone(),
            name: spec.name.clone(),
            dependent: dependent.to_string(),
        })?;
        let root = found
            .root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {:?}", found.root))?;

        Ok(FoundRepository {
            root,
            manifest: found.manifest.clone(),
        })
    }
}

/// Make every dependency of `repository` available below `code_dir`,
/// cloning those that declare a `clone_uri`.
///
/// Returns the dependency roots in the order they should be set up, deepest
/// first.
pub fn enlist(
    repository: &Repository,
    code_dir: &Path,
    search: &SearchOptions,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(code_dir).with_context(|| format!("Failed to create {:?}", code_dir))?;
    let code_dir = code_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {:?}", code_dir))?;

    let mut search = search.clone();
    search.required_ancestor_dirs = vec![code_dir.clone()];
    let discovery = Discovery::new(search);
    let roots = vec![code_dir.clone(), repository.root().to_path_buf()];

    let mut queue: VecDeque<DependencySpec> = all_dependencies(repository.manifest(), None).into();
    let mut seen = BTreeSet::from([repository.manifest().id.clone()]);
    let mut order = Vec::new();

    while let Some(spec) = queue.pop_front() {
        if !seen.insert(spec.id.clone()) {
            continue;
        }

        let wanted = BTreeSet::from([spec.id.clone()]);
        let root = match discovery.find(&roots, &wanted)?.remove(&spec.id) {
            Some(found) => found.root,
            None => {
                let Some(uri) = &spec.clone_uri else {
                    return Err(DevEnvError::DependencyNotFound {
                        id: spec.id.clone(),
                        name: spec.name.clone(),
                        dependent: repository.name().to_string(),
                    }
                    .into());
                };
                let destination = code_dir.join(&spec.name);
                repository::clone_into(uri, &destination)?;
                destination
            }
        };

        let manifest = Manifest::load_from_repository(&root)?;
        queue.extend(all_dependencies(&manifest, spec.configuration.as_deref()));
        order.push(root);
    }

    order.reverse();
    Ok(order)
}

/// Dependencies of the named configuration, or of every configuration
fn all_dependencies(manifest: &Manifest, configuration: Option<&str>) -> Vec<DependencySpec> {
    let mut dependencies = manifest.dependencies.clone();
    for (name, spec) in &manifest.configurations {
        if configuration.map_or(true, |wanted| wanted == name) {
            dependencies.extend(spec.dependencies.iter().cloned());
        }
    }
    dependencies
}
