use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::environment::Shell;
use crate::error::DevEnvError;
use crate::manifest::Manifest;
use crate::platform::OperatingSystem;
use crate::template::{self, TemplateContext};
use crate::ui;

/// Environment name used when `--name` is not given
pub const DEFAULT_ENVIRONMENT_NAME: &str = "DefaultEnv";

/// A tool directory containing this file is not a tool
pub const IGNORE_AS_TOOL: &str = "IgnoreAsTool";

/// A directory containing this file is never considered during dependency discovery
pub const IGNORE_AS_DEPENDENCY: &str = "IgnoreAsBootstrapDependency";

const HOOK_MARKER: &str = "installed by `devenv setup`";

/// Script templates embedded at compile time
const ACTIVATE_SH: &str = include_str!("../templates/Activate.sh");
const DEACTIVATE_SH: &str = include_str!("../templates/Deactivate.sh");
const ACTIVATE_CMD: &str = include_str!("../templates/Activate.cmd");
const DEACTIVATE_CMD: &str = include_str!("../templates/Deactivate.cmd");
const GIT_HOOK: &str = include_str!("../templates/git-hook.sh");

/// Well-known locations inside a repository
#[derive(Debug, Clone, Copy)]
pub enum RepositoryPath {
    /// Repository root
    Root,
    /// `Bootstrap.toml`
    Manifest,
    /// Scripts added to PATH: `Scripts/`
    Scripts,
    /// Versioned tool trees: `Tools/`
    Tools,
    /// Language libraries: `Libraries/`
    Libraries,
    /// Only directory devenv writes to: `Generated/`
    Generated,
}

/// Wrapper scripts written by setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrapper {
    Activate,
    Deactivate,
}

impl Wrapper {
    pub const ALL: [Wrapper; 2] = [Wrapper::Activate, Wrapper::Deactivate];

    fn stem(self) -> &'static str {
        match self {
            Wrapper::Activate => "Activate",
            Wrapper::Deactivate => "Deactivate",
        }
    }

    /// `Activate.sh` for the default environment, `Activate.<name>.sh` otherwise
    pub fn file_name(self, os: OperatingSystem, environment: &str) -> String {
        if environment == DEFAULT_ENVIRONMENT_NAME {
            format!("{}.{}", self.stem(), os.script_extension())
        } else {
            format!("{}.{}.{}", self.stem(), environment, os.script_extension())
        }
    }

    fn template(self, os: OperatingSystem) -> &'static str {
        match (self, os.is_windows()) {
            (Wrapper::Activate, false) => ACTIVATE_SH,
            (Wrapper::Deactivate, false) => DEACTIVATE_SH,
            (Wrapper::Activate, true) => ACTIVATE_CMD,
            (Wrapper::Deactivate, true) => DEACTIVATE_CMD,
        }
    }
}

struct WrapperContext<'a> {
    script: String,
    shell: Shell,
    binary: &'a Path,
    repository: &'a Path,
    environment: &'a str,
}

impl TemplateContext for WrapperContext<'_> {
    fn value(&self, key: &str) -> Option<String> {
        match key {
            "script" => Some(self.script.clone()),
            "binary" => Some(self.shell.quote(&self.binary.to_string_lossy())),
            "repository" => Some(self.shell.quote(&self.repository.to_string_lossy())),
            "repository_display" => Some(self.repository.display().to_string()),
            "environment" => Some(self.environment.to_string()),
            "environment_quoted" => Some(self.shell.quote(self.environment)),
            _ => None,
        }
    }
}

struct HookContext<'a> {
    hook: &'a str,
    command: &'a str,
    repository: &'a Path,
}

impl TemplateContext for HookContext<'_> {
    fn value(&self, key: &str) -> Option<String> {
        match key {
            "hook" => Some(self.hook.to_string()),
            "command" => Some(self.command.to_string()),
            "repository" => Some(Shell::Bash.quote(&self.repository.to_string_lossy())),
            "repository_display" => Some(self.repository.display().to_string()),
            _ => None,
        }
    }
}

/// A repository on disk together with its manifest
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    manifest: Manifest,
}

impl Repository {
    /// Open the repository rooted at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let root = path
            .canonicalize()
            .with_context(|| format!("Repository directory {:?} does not exist", path))?;
        let manifest = Manifest::load_from_repository(&root)?;
        Ok(Self { root, manifest })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Get path for a specific repository location
    pub fn path(&self, path_type: RepositoryPath) -> PathBuf {
        Self::path_in(&self.root, path_type)
    }

    pub fn path_in(root: &Path, path_type: RepositoryPath) -> PathBuf {
        match path_type {
            RepositoryPath::Root => root.to_path_buf(),
            RepositoryPath::Manifest => Manifest::path_for(root),
            RepositoryPath::Scripts => root.join("Scripts"),
            RepositoryPath::Tools => root.join("Tools"),
            RepositoryPath::Libraries => root.join("Libraries"),
            RepositoryPath::Generated => root.join("Generated"),
        }
    }

    /// `Generated/<os>/<environment>`, where the setup record lives
    pub fn environment_dir(root: &Path, os: OperatingSystem, environment: &str) -> PathBuf {
        Self::path_in(root, RepositoryPath::Generated)
            .join(os.as_str())
            .join(environment)
    }

    /// Write the activate/deactivate wrappers for `environment`
    pub fn write_wrappers(
        &self,
        os: OperatingSystem,
        environment: &str,
        binary: &Path,
    ) -> Result<Vec<PathBuf>> {
        let shell = Shell::default_for(os);
        let mut written = Vec::new();

        for wrapper in Wrapper::ALL {
            let script = wrapper.file_name(os, environment);
            let path = self.root.join(&script);
            let context = WrapperContext {
                script,
                shell,
                binary,
                repository: &self.root,
                environment,
            };

            let contents = template::render(wrapper.template(os), &context)
                .with_context(|| format!("Failed to render {:?}", path))?;
            fs::write(&path, contents)
                .with_context(|| format!("Failed to write {:?}", path))?;
            make_executable(&path)?;

            tracing::debug!("wrote {:?}", path);
            written.push(path);
        }

        Ok(written)
    }

    /// Install the git hooks declared in the manifest.
    ///
    /// Hooks not written by devenv are moved aside to `<hook>.bak` once.
    /// Repositories that are not git work trees are skipped.
    pub fn install_hooks(&self) -> Result<Vec<PathBuf>> {
        if self.manifest.hooks.is_empty() {
            return Ok(Vec::new());
        }

        let git = match git2::Repository::open(&self.root) {
            Ok(git) => git,
            Err(err) => {
                tracing::debug!("skipping hooks for {:?}: {}", self.root, err);
                ui::warn(format!(
                    "{} is not a git repository; hooks were not installed",
                    self.root.display()
                ));
                return Ok(Vec::new());
            }
        };

        let hooks_dir = git.path().join("hooks");
        fs::create_dir_all(&hooks_dir)
            .with_context(|| format!("Failed to create hooks directory {:?}", hooks_dir))?;

        let mut installed = Vec::new();
        for (hook, command) in &self.manifest.hooks {
            let path = hooks_dir.join(hook);

            if path.exists() {
                let existing = fs::read_to_string(&path).unwrap_or_default();
                let backup = hooks_dir.join(format!("{hook}.bak"));
                if !existing.contains(HOOK_MARKER) && !backup.exists() {
                    fs::rename(&path, &backup).with_context(|| {
                        format!("Failed to back up existing hook {:?}", path)
                    })?;
                }
            }

            let context = HookContext {
                hook,
                command,
                repository: &self.root,
            };
            let contents = template::render(GIT_HOOK, &context)
                .with_context(|| format!("Failed to render hook '{}'", hook))?;
            fs::write(&path, contents)
                .with_context(|| format!("Failed to write hook {:?}", path))?;
            make_executable(&path)?;
            installed.push(path);
        }

        Ok(installed)
    }

    /// Run the manifest's setup commands in order from the repository root
    pub fn run_setup_commands(&self, os: OperatingSystem) -> Result<()> {
        for command in &self.manifest.setup_commands {
            let step = ui::Step::start("Running", command.clone());

            let mut process = if os.is_windows() {
                let mut process = Command::new("cmd");
                process.arg("/C");
                process
            } else {
                let mut process = Command::new("sh");
                process.arg("-c");
                process
            };
            let status = process
                .arg(command)
                .current_dir(&self.root)
                .status()
                .with_context(|| format!("Failed to start `{}`", command))?;

            if !status.success() {
                let err = DevEnvError::ExternalCommand {
                    command: command.clone(),
                    status: status.code(),
                };
                step.failed("Failed", &err);
                return Err(err.into());
            }

            step.done("Finished", None);
        }

        Ok(())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)
        .with_context(|| format!("Failed to read permissions of {:?}", path))?
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("Failed to set permissions of {:?}", path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Convert repository identifier to canonical URL
///
/// Handles multiple input formats and normalizes to a canonical form:
/// - GitHub shorthand: "user/repo" -> "https://github.com/user/repo.git"
/// - Full URLs: normalized (removes trailing slashes, ensures .git suffix)
/// - Other formats: passed through as-is
pub fn canonical_url(repository: &str) -> String {
    let url = if repository.contains("://") {
        repository.to_string()
    } else if repository.contains('/') && !repository.contains('.') {
        format!("https://github.com/{}.git", repository)
    } else {
        repository.to_string()
    };

    let url = url.trim_end_matches('/');

    if (url.starts_with("https://") || url.starts_with("http://")) && !url.ends_with(".git") {
        format!("{}.git", url)
    } else {
        url.to_string()
    }
}

/// Clone a dependency into `destination`
pub fn clone_into(repository: &str, destination: &Path) -> Result<()> {
    let url = canonical_url(repository);

    let step = ui::Step::start("Cloning", url.clone());
    match git2::Repository::clone(&url, destination) {
        Ok(_) => {
            step.done("Cloned", Some(&format!("into {}", destination.display())));
            Ok(())
        }
        Err(err) => {
            step.failed("Failed", &err);
            Err(err).with_context(|| {
                format!("Failed to clone repository {} to {:?}", url, destination)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn repository_with(manifest: &str) -> (TempDir, Repository) {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Bootstrap.toml"), manifest).unwrap();
        let repository = Repository::open(temp.path()).unwrap();
        (temp, repository)
    }

    #[test]
    fn test_repository_paths() {
        let (_temp, repository) = repository_with("name = \"Repo\"\nid = \"repo\"\n");

        assert!(repository.path(RepositoryPath::Scripts).ends_with("Scripts"));
        assert!(repository.path(RepositoryPath::Manifest).ends_with("Bootstrap.toml"));
        assert_eq!(repository.path(RepositoryPath::Root), repository.root());

        let dir = Repository::environment_dir(repository.root(), OperatingSystem::Linux, "DefaultEnv");
        assert!(dir.ends_with("Generated/Linux/DefaultEnv"));
    }

    #[test]
    fn test_open_missing_directory() {
        let temp = TempDir::new().unwrap();
        assert!(Repository::open(&temp.path().join("missing")).is_err());
    }

    #[rstest]
    #[case(Wrapper::Activate, OperatingSystem::Linux, "DefaultEnv", "Activate.sh")]
    #[case(Wrapper::Deactivate, OperatingSystem::MacOS, "DefaultEnv", "Deactivate.sh")]
    #[case(Wrapper::Activate, OperatingSystem::Linux, "py311", "Activate.py311.sh")]
    #[case(Wrapper::Activate, OperatingSystem::Windows, "DefaultEnv", "Activate.cmd")]
    fn test_wrapper_file_name(
        #[case] wrapper: Wrapper,
        #[case] os: OperatingSystem,
        #[case] environment: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(wrapper.file_name(os, environment), expected);
    }

    #[test]
    fn test_write_wrappers() {
        let (_temp, repository) = repository_with("name = \"Repo\"\nid = \"repo\"\n");
        let written = repository
            .write_wrappers(OperatingSystem::Linux, "DefaultEnv", Path::new("/opt/devenv/bin/devenv"))
            .unwrap();

        assert_eq!(written.len(), 2);
        let activate = fs::read_to_string(repository.root().join("Activate.sh")).unwrap();
        assert!(activate.contains("'/opt/devenv/bin/devenv' activate"));
        assert!(activate.contains("--name 'DefaultEnv'"));
        assert!(!activate.contains("{{"));

        let deactivate = fs::read_to_string(repository.root().join("Deactivate.sh")).unwrap();
        assert!(deactivate.contains("deactivate --shell"));
    }

    #[test]
    fn test_write_cmd_wrappers() {
        let (_temp, repository) = repository_with("name = \"Repo\"\nid = \"repo\"\n");
        repository
            .write_wrappers(OperatingSystem::Windows, "Ci", Path::new(r"C:\devenv.exe"))
            .unwrap();

        let activate = fs::read_to_string(repository.root().join("Activate.Ci.cmd")).unwrap();
        assert!(activate.contains("call \"C:\\devenv.exe\" activate --shell cmd"));
        assert!(activate.contains("--name \"Ci\""));
    }

    #[test]
    fn test_install_hooks_backs_up_existing() {
        let (_temp, repository) = repository_with(
            "name = \"Repo\"\nid = \"repo\"\n[hooks]\ncommit-msg = \"Scripts/check.sh\"\n",
        );
        git2::Repository::init(repository.root()).unwrap();
        let hooks = repository.root().join(".git/hooks");
        fs::create_dir_all(&hooks).unwrap();
        fs::write(hooks.join("commit-msg"), "#!/bin/sh\necho custom\n").unwrap();

        let installed = repository.install_hooks().unwrap();
        assert_eq!(installed.len(), 1);

        let hook = fs::read_to_string(hooks.join("commit-msg")).unwrap();
        assert!(hook.contains(HOOK_MARKER));
        assert!(hook.contains("Scripts/check.sh \"$@\""));
        assert!(fs::read_to_string(hooks.join("commit-msg.bak"))
            .unwrap()
            .contains("echo custom"));

        // Reinstalling keeps the original backup
        repository.install_hooks().unwrap();
        assert!(fs::read_to_string(hooks.join("commit-msg.bak"))
            .unwrap()
            .contains("echo custom"));
    }

    #[test]
    fn test_install_hooks_outside_git_is_skipped() {
        let (_temp, repository) = repository_with(
            "name = \"Repo\"\nid = \"repo\"\n[hooks]\npre-commit = \"true\"\n",
        );
        assert!(repository.install_hooks().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_setup_commands() {
        let (_temp, repository) = repository_with(
            "name = \"Repo\"\nid = \"repo\"\nsetup_commands = [\"touch ran.txt\"]\n",
        );
        repository.run_setup_commands(OperatingSystem::Linux).unwrap();
        assert!(repository.root().join("ran.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_setup_command_is_fatal() {
        let (_temp, repository) = repository_with(
            "name = \"Repo\"\nid = \"repo\"\nsetup_commands = [\"exit 3\", \"touch never.txt\"]\n",
        );
        let err = repository.run_setup_commands(OperatingSystem::Linux).unwrap_err();
        let err = err.downcast_ref::<DevEnvError>().unwrap();
        assert!(matches!(err, DevEnvError::ExternalCommand { status: Some(3), .. }));
        assert!(!repository.root().join("never.txt").exists());
    }

    #[rstest]
    #[case("user/repo", "https://github.com/user/repo.git")]
    #[case("https://github.com/user/repo/", "https://github.com/user/repo.git")]
    #[case("http://github.com/user/repo", "http://github.com/user/repo.git")]
    #[case("https://gitlab.com/user/repo", "https://gitlab.com/user/repo.git")]
    #[case("git@github.com:user/repo.git", "git@github.com:user/repo.git")]
    #[case("file:///path/to/repo", "file:///path/to/repo")]
    fn test_canonical_url(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(canonical_url(input), expected);
    }

    #[test]
    fn test_clone_into() {
        let source = TempDir::new().unwrap();
        let git = git2::Repository::init(source.path()).unwrap();
        fs::write(source.path().join("Bootstrap.toml"), "name = \"Dep\"\nid = \"dep\"\n").unwrap();
        let mut index = git.index().unwrap();
        index.add_path(Path::new("Bootstrap.toml")).unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = git.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        git.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();

        let target = TempDir::new().unwrap();
        let destination = target.path().join("Dep");
        clone_into(&format!("file://{}", source.path().display()), &destination).unwrap();
        assert!(destination.join("Bootstrap.toml").exists());
    }
}
