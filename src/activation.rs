//! Activation: validate the request against the shell's current state,
//! compose the environment and hand a fragment back to the wrapper script.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::bootstrap::EnvironmentBootstrap;
use crate::compose::{compose, ComposeInput, ComposeRequest, Composition};
use crate::config::Settings;
use crate::environment::{EnvironmentVariables, Fragment, Mutation, Shell};
use crate::error::DevEnvError;
use crate::fragment;
use crate::manifest::{Manifest, DEFAULT_CONFIGURATION};
use crate::platform::Platform;
use crate::repository::{Repository, Wrapper, DEFAULT_ENVIRONMENT_NAME};
use crate::snapshot::{EnvironmentSnapshot, SnapshotStore};
use crate::util::xdg;

pub const ACTIVATED_KEY_VAR: &str = "DEVELOPMENT_ENVIRONMENT_REPOSITORY_ACTIVATED_KEY";
pub const FOUNDATION_VAR: &str = "DEVELOPMENT_ENVIRONMENT_FOUNDATION";
pub const ENVIRONMENT_NAME_VAR: &str = "DEVELOPMENT_ENVIRONMENT_ENVIRONMENT_NAME";
pub const REPOSITORY_VAR: &str = "DEVELOPMENT_ENVIRONMENT_REPOSITORY";
pub const CONFIGURATION_VAR: &str = "DEVELOPMENT_ENVIRONMENT_REPOSITORY_CONFIGURATION";
pub const MIXINS_VAR: &str = "DEVELOPMENT_ENVIRONMENT_MIXINS";
pub const PATH_VAR: &str = "PATH";

/// How the wrapper script was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Invocation {
    /// Read into the current shell (`. Activate.sh`, `call Activate.cmd`)
    Sourced,
    /// Run as a child process, which cannot change the calling shell
    Executed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Inactive,
    Validating,
    Generating,
    Executing,
    Active,
    Error,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationState::Inactive => "inactive",
            ActivationState::Validating => "validating",
            ActivationState::Generating => "generating",
            ActivationState::Executing => "executing",
            ActivationState::Active => "active",
            ActivationState::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Everything activation and deactivation read from the outside world
#[derive(Debug, Clone)]
pub struct ShellContext {
    pub platform: Platform,
    pub shell: Shell,
    pub invocation: Invocation,
    /// Variables of the calling shell
    pub variables: EnvironmentVariables,
    /// Where activation snapshots are kept
    pub state_dir: PathBuf,
    /// Where fragments are written for the wrapper to source
    pub fragment_dir: PathBuf,
    /// `Libraries/<Language>` to variable name
    pub library_variables: BTreeMap<String, String>,
}

impl ShellContext {
    /// Context for the running process: its variables, the XDG state
    /// directory and the user's library mappings
    pub fn from_process(shell: Shell, invocation: Invocation) -> Result<Self> {
        let variables = std::env::vars_os()
            .filter_map(|(name, value)| {
                Some((name.into_string().ok()?, value.into_string().ok()?))
            })
            .collect();
        let settings = Settings::load_default()?;

        Ok(Self {
            platform: Platform::current(),
            shell,
            invocation,
            variables,
            state_dir: xdg::state_dir()?,
            fragment_dir: std::env::temp_dir(),
            library_variables: settings.library_variables(),
        })
    }

    /// Value of `name` in the calling shell, treating empty as unset
    pub fn var(&self, name: &str) -> Option<&str> {
        self.variables
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore::new(&self.state_dir)
    }

    pub(crate) fn require_sourced(
        &self,
        wrapper: Wrapper,
        environment: &str,
    ) -> Result<(), DevEnvError> {
        match self.invocation {
            Invocation::Sourced => Ok(()),
            Invocation::Executed => Err(DevEnvError::NotSourced {
                script: wrapper.file_name(self.platform.os, environment),
            }),
        }
    }
}

/// What to activate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    pub repository: PathBuf,
    pub configuration: Option<String>,
    /// Environment name; defaults to the active one, then `DefaultEnv`
    pub environment: Option<String>,
}

/// A repository taking part in an activation, highest priority first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedRepository {
    pub name: String,
    pub root: PathBuf,
    pub configuration: Option<String>,
    pub is_mixin: bool,
}

/// Result of the generating step
#[derive(Debug, Clone)]
pub struct ActivationPlan {
    pub key: String,
    pub repositories: Vec<ActivatedRepository>,
    pub composition: Composition,
    pub mutations: Vec<Mutation>,
}

/// Result of a complete activation
#[derive(Debug, Clone)]
pub struct ActivationOutcome {
    pub plan: ActivationPlan,
    pub fragment: PathBuf,
}

/// State established by validation and consumed by generation
#[derive(Debug)]
struct Validated {
    environment: String,
    base_root: PathBuf,
    base_record: EnvironmentBootstrap,
    configuration: String,
    mixins: Vec<PathBuf>,
    key: Option<String>,
}

pub struct Activation<'a> {
    context: &'a ShellContext,
    state: ActivationState,
}

impl<'a> Activation<'a> {
    pub fn new(context: &'a ShellContext) -> Self {
        Self {
            context,
            state: ActivationState::Inactive,
        }
    }

    pub fn state(&self) -> ActivationState {
        self.state
    }

    fn transition(&mut self, next: ActivationState) {
        tracing::debug!("activation: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Validate, generate and write the fragment for the wrapper to source
    pub fn run(&mut self, request: &ActivationRequest) -> Result<ActivationOutcome> {
        let first_activation = self.context.var(ACTIVATED_KEY_VAR).is_none();
        let result = self.stages(request).and_then(|plan| {
            self.transition(ActivationState::Executing);
            let written = fragment::write_fragment(
                &self.context.fragment_dir,
                &Fragment::new(self.context.shell, plan.mutations.clone()),
            );
            match written {
                Ok(fragment) => Ok(ActivationOutcome { plan, fragment }),
                Err(err) => {
                    // The shell never learns the key, so nothing could restore from it
                    if first_activation {
                        if let Err(cleanup) = self.context.snapshots().remove(&plan.key) {
                            tracing::warn!("{:#}", cleanup);
                        }
                    }
                    Err(err)
                }
            }
        });

        self.finish(result)
    }

    /// Validate and generate without writing a fragment.
    ///
    /// The snapshot is persisted, so once the caller applies the returned
    /// mutations they can be undone by deactivation.
    pub fn plan(&mut self, request: &ActivationRequest) -> Result<ActivationPlan> {
        let result = self.stages(request);
        self.finish(result)
    }

    fn stages(&mut self, request: &ActivationRequest) -> Result<ActivationPlan> {
        self.transition(ActivationState::Validating);
        let validated = self.validate(request)?;

        self.transition(ActivationState::Generating);
        self.generate(validated)
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.transition(ActivationState::Active);
                Ok(value)
            }
            Err(err) => {
                let failed = self.state;
                self.transition(ActivationState::Error);
                Err(err.context(format!("Activation failed while {failed}")))
            }
        }
    }

    fn validate(&self, request: &ActivationRequest) -> Result<Validated> {
        let context = self.context;

        let environment = request
            .environment
            .clone()
            .or_else(|| context.var(ENVIRONMENT_NAME_VAR).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT_NAME.to_string());

        context.require_sourced(Wrapper::Activate, &environment)?;

        let root = request
            .repository
            .canonicalize()
            .with_context(|| format!("Repository directory {:?} does not exist", request.repository))?;

        let record = load_record(&root, context, &environment)?;

        let active_repository = context.var(REPOSITORY_VAR).map(PathBuf::from);
        let active_environment = context.var(ENVIRONMENT_NAME_VAR);

        let mut stale = record.stale_manifests();

        let (base_root, base_record, configuration) = if record.is_mixin_repo {
            let Some(base_root) = active_repository else {
                return Err(DevEnvError::MixinWithoutBase { repository: root }.into());
            };
            if let Some(configuration) = &request.configuration {
                return Err(DevEnvError::NotConfigurable {
                    repository: root,
                    configuration: configuration.clone(),
                }
                .into());
            }

            let base_environment = active_environment.unwrap_or(&environment).to_string();
            let base_record = load_record(&base_root, context, &base_environment)?;
            stale.extend(base_record.stale_manifests());

            let configuration = context
                .var(CONFIGURATION_VAR)
                .unwrap_or(DEFAULT_CONFIGURATION)
                .to_string();
            base_record.configuration(&configuration)?;

            (base_root, base_record, configuration)
        } else {
            if let Some(active) = &active_repository {
                if *active != root {
                    return Err(DevEnvError::RepositoryConflict {
                        active: active.clone(),
                        requested: root,
                    }
                    .into());
                }
                if let Some(active_environment) = active_environment {
                    if active_environment != environment {
                        return Err(DevEnvError::EnvironmentConflict {
                            active: active_environment.to_string(),
                            requested: environment,
                        }
                        .into());
                    }
                }
            }

            let configuration = if record.is_configurable {
                let Some(configuration) = request.configuration.clone() else {
                    return Err(DevEnvError::ConfigurationRequired {
                        available: record.configuration_names(),
                    }
                    .into());
                };
                record.configuration(&configuration)?;

                if active_repository.is_some() {
                    if let Some(active) = context.var(CONFIGURATION_VAR) {
                        if active != configuration {
                            return Err(DevEnvError::ConfigurationMismatch {
                                active: active.to_string(),
                                requested: configuration,
                            }
                            .into());
                        }
                    }
                }
                configuration
            } else {
                match request.configuration.as_deref() {
                    None | Some(DEFAULT_CONFIGURATION) => DEFAULT_CONFIGURATION.to_string(),
                    Some(other) => {
                        return Err(DevEnvError::NotConfigurable {
                            repository: root,
                            configuration: other.to_string(),
                        }
                        .into())
                    }
                }
            };

            (root.clone(), record.clone(), configuration)
        };

        if !stale.is_empty() {
            stale.sort();
            stale.dedup();
            let changed = stale
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(DevEnvError::StaleSetup {
                repository: root,
                changed,
            }
            .into());
        }

        let mut mixins: Vec<PathBuf> = context
            .var(MIXINS_VAR)
            .map(|value| {
                context
                    .platform
                    .split_paths(value)
                    .into_iter()
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        if record.is_mixin_repo && !mixins.contains(&root) {
            mixins.insert(0, root.clone());
        }

        let environment = if record.is_mixin_repo {
            base_record.environment.clone()
        } else {
            environment
        };

        Ok(Validated {
            environment,
            base_root,
            base_record,
            configuration,
            mixins,
            key: context.var(ACTIVATED_KEY_VAR).map(str::to_string),
        })
    }

    fn generate(&self, validated: Validated) -> Result<ActivationPlan> {
        let context = self.context;
        let platform = context.platform;
        let record = validated.base_record.configuration(&validated.configuration)?;

        let mut repositories = Vec::new();
        let mut inputs = Vec::new();

        for mixin in &validated.mixins {
            let manifest = Manifest::load_from_repository(mixin)?;
            let resolved = manifest.resolve_configuration(mixin, None)?;
            repositories.push(ActivatedRepository {
                name: manifest.name.clone(),
                root: mixin.clone(),
                configuration: None,
                is_mixin: true,
            });
            inputs.push(ComposeInput {
                root: mixin.clone(),
                name: manifest.name,
                is_mixin: true,
                variables: resolved.variables,
            });
        }

        let base_configuration = validated
            .base_record
            .is_configurable
            .then(|| validated.configuration.clone());
        let dependencies = record
            .repositories
            .iter()
            .map(|dependency| (dependency.root.clone(), dependency.configuration.clone()));

        for (root, configuration) in
            std::iter::once((validated.base_root.clone(), base_configuration)).chain(dependencies)
        {
            let manifest = Manifest::load_from_repository(&root)?;
            let resolved = manifest.resolve_configuration(&root, configuration.as_deref())?;
            repositories.push(ActivatedRepository {
                name: manifest.name.clone(),
                root: root.clone(),
                configuration,
                is_mixin: manifest.mixin,
            });
            inputs.push(ComposeInput {
                root,
                name: manifest.name,
                is_mixin: manifest.mixin,
                variables: resolved.variables,
            });
        }

        let composition = compose(
            &inputs,
            ComposeRequest {
                platform,
                environment: &validated.environment,
                pins: &record.tools,
                library_variables: &context.library_variables,
            },
        )?;

        let store = context.snapshots();
        let mut snapshot = match &validated.key {
            Some(key) => store.load(key)?,
            None => EnvironmentSnapshot::new(fragment::unique_token()),
        };

        let mut values: Vec<(String, String)> = vec![
            (ACTIVATED_KEY_VAR.into(), snapshot.key.clone()),
            (
                FOUNDATION_VAR.into(),
                validated.base_record.foundation_repo.display().to_string(),
            ),
            (ENVIRONMENT_NAME_VAR.into(), validated.environment.clone()),
            (REPOSITORY_VAR.into(), validated.base_root.display().to_string()),
        ];
        if validated.base_record.is_configurable {
            values.push((CONFIGURATION_VAR.into(), validated.configuration.clone()));
        }
        if !validated.mixins.is_empty() {
            let mixins: Vec<String> = validated
                .mixins
                .iter()
                .map(|mixin| mixin.display().to_string())
                .collect();
            values.push((MIXINS_VAR.into(), platform.join_paths(&mixins)));
        }
        values.extend(
            composition
                .variables
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        let mut lists: Vec<(String, Vec<String>)> = composition
            .libraries
            .iter()
            .map(|(name, entries)| (name.clone(), to_strings(entries)))
            .collect();
        lists.push((PATH_VAR.into(), to_strings(&composition.path)));

        for (name, contributed) in &lists {
            let previous = snapshot.contributed(name).to_vec();
            let current = context
                .var(name)
                .map(|value| platform.split_paths(value))
                .unwrap_or_default();
            let mut entries = contributed.clone();
            entries.extend(
                current
                    .into_iter()
                    .filter(|entry| !previous.contains(entry) && !contributed.contains(entry)),
            );
            values.push((name.clone(), platform.join_paths(&entries)));
        }

        // Originals are recorded raw; a variable set to "" is restored as ""
        for (name, _) in &values {
            snapshot.record(name, context.variables.get(name).map(String::as_str));
        }
        snapshot.contributed = lists.into_iter().collect();

        // Variables an earlier activation in this session set but this one does not
        let mut mutations: Vec<Mutation> = Vec::new();
        let (markers, rest) = values.split_at(4);
        mutations.extend(markers.iter().map(|(n, v)| Mutation::set(n.clone(), v.clone())));
        for (name, recorded) in &snapshot.original {
            if !values.iter().any(|(n, _)| n == name) {
                mutations.push(Mutation::restore(name.clone(), recorded.value.clone()));
            }
        }
        mutations.extend(rest.iter().map(|(n, v)| Mutation::set(n.clone(), v.clone())));

        store.save(&snapshot)?;

        Ok(ActivationPlan {
            key: snapshot.key,
            repositories,
            composition,
            mutations,
        })
    }
}

fn load_record(
    root: &Path,
    context: &ShellContext,
    environment: &str,
) -> Result<EnvironmentBootstrap> {
    let dir = Repository::environment_dir(root, context.platform.os, environment);
    if !EnvironmentBootstrap::exists(&dir) {
        return Err(DevEnvError::NotSetUp {
            repository: root.to_path_buf(),
            environment: environment.to_string(),
            record: dir,
        }
        .into());
    }
    EnvironmentBootstrap::load(&dir)
}

fn to_strings(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect()
}
