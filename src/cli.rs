use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::activation::Invocation;
use crate::environment::Shell;

/// Development environment bootstrapper
///
/// devenv sets up, activates and deactivates per-repository development
/// environments declared in `Bootstrap.toml` manifests. Setup writes
/// `Activate` and `Deactivate` scripts into the repository; source them to
/// change the current shell.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set up a repository and its dependencies
    ///
    /// Resolves dependencies, runs the manifest's setup commands and writes
    /// the activation scripts. Does nothing if the environment is already
    /// set up, unless --force is given.
    Setup(SetupArgs),

    /// Clone missing dependencies into a common directory, then set up
    Bootstrap {
        /// Directory that holds the repository's dependencies
        #[arg(value_name = "CODE_DIR")]
        code_dir: PathBuf,

        #[command(flatten)]
        setup: SetupArgs,
    },

    /// Generate the activation fragment (invoked by the Activate scripts)
    #[command(hide = true)]
    Activate {
        /// Configuration to activate
        #[arg(value_name = "CONFIGURATION")]
        configuration: Option<String>,

        #[command(flatten)]
        shell: ShellArgs,

        /// Repository root
        #[arg(long, value_name = "DIR", default_value = ".")]
        repository: PathBuf,

        /// Environment name
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
    },

    /// Generate the deactivation fragment (invoked by the Deactivate scripts)
    #[command(hide = true)]
    Deactivate {
        #[command(flatten)]
        shell: ShellArgs,
    },

    /// List the configurations of a repository
    Configurations {
        /// Repository root
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        repository: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ConfigurationFormat::Standard)]
        format: ConfigurationFormat,
    },

    /// Show where each tool of a repository resolves on this platform
    Tools {
        /// Repository root
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        repository: PathBuf,

        /// Configuration whose version pins apply
        #[arg(short, long, value_name = "NAME")]
        configuration: Option<String>,

        /// Environment name
        #[arg(short, long, value_name = "NAME")]
        name: Option<String>,
    },

    /// Show the environment active in this shell
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct SetupArgs {
    /// Repository root
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub repository: PathBuf,

    /// Configuration to set up (may be repeated; defaults to all)
    #[arg(short, long = "configuration", value_name = "NAME")]
    pub configurations: Vec<String>,

    /// Set up again even if the environment already exists
    #[arg(short, long)]
    pub force: bool,

    /// Environment name
    #[arg(short, long, value_name = "NAME")]
    pub name: Option<String>,

    /// Do not install git hooks
    #[arg(long)]
    pub no_hooks: bool,

    /// Directory levels searched below each root for dependencies
    #[arg(long, value_name = "N")]
    pub search_depth: Option<usize>,

    /// Maximum number of directories searched for dependencies
    #[arg(long, value_name = "N")]
    pub max_num_searches: Option<usize>,

    /// Only search for dependencies below these directories
    #[arg(long = "required-ancestor-dir", value_name = "DIR")]
    pub required_ancestor_dirs: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct ShellArgs {
    /// Dialect of the generated fragment
    #[arg(long, value_enum)]
    pub shell: Option<Shell>,

    /// How the calling script was started
    #[arg(long, value_enum, default_value_t = Invocation::Executed)]
    pub invocation: Invocation,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationFormat {
    Standard,
    Json,
    CommandLine,
}

impl Commands {
    /// The wrapper script a user runs to reach this command
    pub fn script_name(&self) -> &'static str {
        match self {
            Commands::Setup(_) => "Setup",
            Commands::Bootstrap { .. } => "Bootstrap",
            Commands::Activate { .. } => "Activate",
            Commands::Deactivate { .. } => "Deactivate",
            Commands::Configurations { .. } => "Configurations",
            Commands::Tools { .. } => "Tools",
            Commands::Status => "Status",
        }
    }
}
