use devenv::activation::{
    ActivationState, ACTIVATED_KEY_VAR, CONFIGURATION_VAR, MIXINS_VAR, PATH_VAR, REPOSITORY_VAR,
};
use devenv::discovery::SearchOptions;
use devenv::environment::apply;
use devenv::{
    deactivation, Activation, ActivationRequest, Architecture, DevEnvError, EnvironmentVariables,
    Invocation, OperatingSystem, Platform, SetupOptions, Shell, ShellContext,
};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PLATFORM: Platform = Platform::new(OperatingSystem::Linux, Architecture::X64);

struct Workspace {
    temp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    fn code(&self) -> PathBuf {
        self.temp.path().join("code")
    }

    /// Create a repository with a script and a Python library, then set it up
    fn repository(&self, name: &str, manifest: &str) -> PathBuf {
        let root = self.code().join(name);
        fs::create_dir_all(root.join("Scripts")).unwrap();
        fs::write(root.join("Scripts").join(name.to_lowercase()), "#!/bin/sh\n").unwrap();
        let library = root.join("Libraries/Python").join(name.to_lowercase());
        fs::create_dir_all(&library).unwrap();
        fs::write(library.join("__init__.py"), "").unwrap();
        fs::write(root.join("Bootstrap.toml"), manifest).unwrap();

        let options = SetupOptions {
            repository: root.clone(),
            configurations: Vec::new(),
            environment: "DefaultEnv".into(),
            force: false,
            no_hooks: true,
            platform: PLATFORM,
            binary: PathBuf::from("/usr/local/bin/devenv"),
            foundation: None,
            search: SearchOptions {
                search_depth: 3,
                max_num_searches: None,
                required_ancestor_dirs: vec![self.code()],
                home_dir: None,
            },
            additional_search_dirs: Vec::new(),
        };
        devenv::setup::run(&options).unwrap();
        root.canonicalize().unwrap()
    }

    fn context(&self, variables: &EnvironmentVariables) -> ShellContext {
        let fragments = self.temp.path().join("tmp");
        fs::create_dir_all(&fragments).unwrap();
        ShellContext {
            platform: PLATFORM,
            shell: Shell::Bash,
            invocation: Invocation::Sourced,
            variables: variables.clone(),
            state_dir: self.temp.path().join("state"),
            fragment_dir: fragments,
            library_variables: BTreeMap::from([("Python".to_string(), "PYTHONPATH".to_string())]),
        }
    }

    /// Activate and apply the result to `variables`
    fn activate(
        &self,
        variables: &mut EnvironmentVariables,
        repository: &Path,
        configuration: Option<&str>,
    ) -> anyhow::Result<()> {
        let context = self.context(variables);
        let plan = Activation::new(&context).plan(&request(repository, configuration))?;
        apply(variables, &plan.mutations);
        Ok(())
    }

    fn deactivate(&self, variables: &mut EnvironmentVariables) -> anyhow::Result<()> {
        let plan = deactivation::plan(&self.context(variables))?;
        apply(variables, &plan.mutations);
        Ok(())
    }

    fn snapshot_count(&self) -> usize {
        fs::read_dir(self.temp.path().join("state/activations"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn request(repository: &Path, configuration: Option<&str>) -> ActivationRequest {
    ActivationRequest {
        repository: repository.to_path_buf(),
        configuration: configuration.map(str::to_string),
        environment: None,
    }
}

fn domain_error(err: &anyhow::Error) -> &DevEnvError {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DevEnvError>())
        .expect("a domain error")
}

fn shell_variables() -> EnvironmentVariables {
    BTreeMap::from([
        ("HOME".to_string(), "/home/dev".to_string()),
        (PATH_VAR.to_string(), "/usr/bin:/bin".to_string()),
    ])
}

fn path_entries(variables: &EnvironmentVariables) -> Vec<String> {
    PLATFORM.split_paths(&variables[PATH_VAR])
}

#[test]
fn test_activate_then_deactivate_restores_shell() {
    let workspace = Workspace::new();
    let base = workspace.repository(
        "Base",
        "name = \"Base\"\nid = \"base\"\n\n[variables]\nBASE_HOME = \"${repo}\"\n",
    );

    let original = shell_variables();
    let mut variables = original.clone();
    workspace.activate(&mut variables, &base, None).unwrap();

    assert_eq!(variables[REPOSITORY_VAR], base.display().to_string());
    assert_eq!(variables["BASE_HOME"], base.display().to_string());
    assert_eq!(
        variables["PYTHONPATH"],
        base.join("Libraries/Python/base").display().to_string()
    );
    assert_eq!(
        path_entries(&variables),
        vec![
            base.join("Scripts").display().to_string(),
            "/usr/bin".to_string(),
            "/bin".to_string(),
        ]
    );
    assert_eq!(workspace.snapshot_count(), 1);

    workspace.deactivate(&mut variables).unwrap();
    assert_eq!(variables, original);
    assert_eq!(workspace.snapshot_count(), 0);
}

#[test]
fn test_reactivation_is_idempotent() {
    let workspace = Workspace::new();
    let base = workspace.repository("Base", "name = \"Base\"\nid = \"base\"\n");

    let mut variables = shell_variables();
    workspace.activate(&mut variables, &base, None).unwrap();
    let once = variables.clone();
    workspace.activate(&mut variables, &base, None).unwrap();

    assert_eq!(variables, once);
    assert_eq!(workspace.snapshot_count(), 1);
}

#[test]
fn test_second_repository_is_rejected() {
    let workspace = Workspace::new();
    let first = workspace.repository("First", "name = \"First\"\nid = \"first\"\n");
    let second = workspace.repository("Second", "name = \"Second\"\nid = \"second\"\n");

    let mut variables = shell_variables();
    workspace.activate(&mut variables, &first, None).unwrap();
    let active = variables.clone();

    let context = workspace.context(&variables);
    let mut activation = Activation::new(&context);
    let err = activation.run(&request(&second, None)).unwrap_err();

    assert!(matches!(
        domain_error(&err),
        DevEnvError::RepositoryConflict { .. }
    ));
    assert_eq!(activation.state(), ActivationState::Error);
    assert_eq!(err.to_string(), "Activation failed while validating");
    assert_eq!(variables, active);
    assert_eq!(
        fs::read_dir(workspace.temp.path().join("tmp")).unwrap().count(),
        0
    );
}

#[test]
fn test_mixin_layers_on_top_of_base() {
    let workspace = Workspace::new();
    let base = workspace.repository(
        "Base",
        "name = \"Base\"\nid = \"base\"\n\n[variables]\nSHARED = \"base\"\n",
    );
    let mixin = workspace.repository(
        "Lint",
        "name = \"Lint\"\nid = \"lint\"\nmixin = true\n\n[variables]\nSHARED = \"lint\"\n",
    );

    let original = shell_variables();
    let mut variables = original.clone();
    workspace.activate(&mut variables, &base, None).unwrap();
    let key = variables[ACTIVATED_KEY_VAR].clone();
    workspace.activate(&mut variables, &mixin, None).unwrap();

    assert_eq!(variables[ACTIVATED_KEY_VAR], key);
    assert_eq!(variables[REPOSITORY_VAR], base.display().to_string());
    assert_eq!(variables[MIXINS_VAR], mixin.display().to_string());
    assert_eq!(variables["SHARED"], "lint");
    assert_eq!(
        path_entries(&variables),
        vec![
            mixin.join("Scripts").display().to_string(),
            base.join("Scripts").display().to_string(),
            "/usr/bin".to_string(),
            "/bin".to_string(),
        ]
    );
    assert_eq!(
        PLATFORM.split_paths(&variables["PYTHONPATH"]),
        vec![
            mixin.join("Libraries/Python/lint").display().to_string(),
            base.join("Libraries/Python/base").display().to_string(),
        ]
    );

    workspace.deactivate(&mut variables).unwrap();
    assert_eq!(variables, original);
}

#[test]
fn test_empty_variables_survive_round_trip() {
    let workspace = Workspace::new();
    let base = workspace.repository(
        "Base",
        "name = \"Base\"\nid = \"base\"\n\n[variables]\nBASE_HOME = \"${repo}\"\n",
    );

    let mut original = shell_variables();
    original.insert("PYTHONPATH".to_string(), String::new());
    original.insert("BASE_HOME".to_string(), String::new());
    let mut variables = original.clone();

    workspace.activate(&mut variables, &base, None).unwrap();
    assert_eq!(
        variables["PYTHONPATH"],
        base.join("Libraries/Python/base").display().to_string()
    );
    assert_eq!(variables["BASE_HOME"], base.display().to_string());

    workspace.deactivate(&mut variables).unwrap();
    assert_eq!(variables, original);
}

#[test]
fn test_failed_fragment_write_leaves_no_snapshot() {
    let workspace = Workspace::new();
    let base = workspace.repository("Base", "name = \"Base\"\nid = \"base\"\n");

    let mut context = workspace.context(&shell_variables());
    context.fragment_dir = workspace.temp.path().join("missing");
    let mut activation = Activation::new(&context);
    let err = activation.run(&request(&base, None)).unwrap_err();

    assert_eq!(activation.state(), ActivationState::Error);
    assert!(format!("{err:#}").contains("Activation failed while executing"));
    assert_eq!(workspace.snapshot_count(), 0);
}

#[test]
fn test_mixin_requires_base() {
    let workspace = Workspace::new();
    let mixin = workspace.repository(
        "Lint",
        "name = \"Lint\"\nid = \"lint\"\nmixin = true\n",
    );

    let mut variables = shell_variables();
    let err = workspace.activate(&mut variables, &mixin, None).unwrap_err();
    assert!(matches!(
        domain_error(&err),
        DevEnvError::MixinWithoutBase { .. }
    ));
    assert_eq!(variables, shell_variables());
    assert_eq!(workspace.snapshot_count(), 0);
}

#[test]
fn test_configuration_must_match_active_one() {
    let workspace = Workspace::new();
    let service = workspace.repository(
        "Service",
        r#"
name = "Service"
id = "service"

[configurations.dev]
variables = { MODE = "dev" }

[configurations.ci]
variables = { MODE = "ci" }
"#,
    );

    let mut variables = shell_variables();
    let err = workspace.activate(&mut variables, &service, None).unwrap_err();
    assert!(matches!(
        domain_error(&err),
        DevEnvError::ConfigurationRequired { .. }
    ));

    workspace
        .activate(&mut variables, &service, Some("dev"))
        .unwrap();
    assert_eq!(variables[CONFIGURATION_VAR], "dev");
    assert_eq!(variables["MODE"], "dev");

    let err = workspace
        .activate(&mut variables, &service, Some("ci"))
        .unwrap_err();
    assert!(matches!(
        domain_error(&err),
        DevEnvError::ConfigurationMismatch { .. }
    ));
    assert_eq!(variables["MODE"], "dev");
}

#[test]
fn test_non_configurable_rejects_configuration() {
    let workspace = Workspace::new();
    let base = workspace.repository("Base", "name = \"Base\"\nid = \"base\"\n");

    let mut variables = shell_variables();
    let err = workspace
        .activate(&mut variables, &base, Some("dev"))
        .unwrap_err();
    assert!(matches!(
        domain_error(&err),
        DevEnvError::NotConfigurable { .. }
    ));
}

#[test]
fn test_changed_manifest_requires_setup() {
    let workspace = Workspace::new();
    let base = workspace.repository("Base", "name = \"Base\"\nid = \"base\"\n");
    fs::write(
        base.join("Bootstrap.toml"),
        "name = \"Base\"\nid = \"base\"\nsetup_commands = [\"true\"]\n",
    )
    .unwrap();

    let mut variables = shell_variables();
    let err = workspace.activate(&mut variables, &base, None).unwrap_err();
    assert!(matches!(domain_error(&err), DevEnvError::StaleSetup { .. }));
    assert!(format!("{:#}", err).contains("run Setup again"));
}

#[test]
fn test_deactivate_without_snapshot() {
    let workspace = Workspace::new();
    let mut variables = shell_variables();
    variables.insert(ACTIVATED_KEY_VAR.to_string(), "0123456789abcdef".to_string());

    let err = workspace.deactivate(&mut variables).unwrap_err();
    assert!(matches!(
        domain_error(&err),
        DevEnvError::MissingActivationState { .. }
    ));
}

#[test]
fn test_fragment_written_for_sourcing() {
    let workspace = Workspace::new();
    let base = workspace.repository("Base", "name = \"Base\"\nid = \"base\"\n");

    let context = workspace.context(&shell_variables());
    let mut activation = Activation::new(&context);
    let outcome = activation.run(&request(&base, None)).unwrap();

    assert_eq!(activation.state(), ActivationState::Active);
    assert!(outcome.fragment.starts_with(workspace.temp.path().join("tmp")));
    let contents = fs::read_to_string(&outcome.fragment).unwrap();
    let first = contents.lines().find(|line| !line.starts_with('#')).unwrap();
    assert!(first.starts_with(&format!("export {ACTIVATED_KEY_VAR}=")));
    assert!(contents.contains("export PATH="));
}

fn arbitrary_shell() -> impl Strategy<Value = EnvironmentVariables> {
    (
        prop::option::of(prop::collection::vec("/[a-z]{1,8}", 0..4)),
        prop::option::of(prop::collection::vec("/[a-z]{1,8}", 0..3)),
        prop::option::of("[a-z]{0,6}"),
        prop::option::of("[A-Za-z0-9 ]{1,12}"),
    )
        .prop_map(|(path, pythonpath, base_home, unrelated)| {
            let mut variables = EnvironmentVariables::new();
            if let Some(path) = path {
                variables.insert(PATH_VAR.to_string(), PLATFORM.join_paths(&path));
            }
            if let Some(pythonpath) = pythonpath {
                variables.insert("PYTHONPATH".to_string(), PLATFORM.join_paths(&pythonpath));
            }
            if let Some(base_home) = base_home {
                variables.insert("BASE_HOME".to_string(), base_home);
            }
            if let Some(unrelated) = unrelated {
                variables.insert("EDITOR".to_string(), unrelated);
            }
            variables
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_activation_round_trip(original in arbitrary_shell(), with_mixin in any::<bool>()) {
        let workspace = Workspace::new();
        let base = workspace.repository(
            "Base",
            "name = \"Base\"\nid = \"base\"\n\n[variables]\nBASE_HOME = \"${repo}\"\n",
        );
        let mixin = workspace.repository("Lint", "name = \"Lint\"\nid = \"lint\"\nmixin = true\n");

        let mut variables = original.clone();
        workspace.activate(&mut variables, &base, None).unwrap();
        workspace.activate(&mut variables, &base, None).unwrap();
        if with_mixin {
            workspace.activate(&mut variables, &mixin, None).unwrap();
        }
        prop_assert_ne!(&variables, &original);

        workspace.deactivate(&mut variables).unwrap();
        prop_assert_eq!(variables, original);
        prop_assert_eq!(workspace.snapshot_count(), 0);
    }
}
