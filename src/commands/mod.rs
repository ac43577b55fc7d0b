use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::activation::{ENVIRONMENT_NAME_VAR, FOUNDATION_VAR};
use crate::cli::{Cli, Commands, SetupArgs};
use crate::config::Settings;
use crate::discovery::SearchOptions;
use crate::platform::Platform;
use crate::repository::DEFAULT_ENVIRONMENT_NAME;
use crate::setup::SetupOptions;
use crate::util::xdg;

mod activate;
mod bootstrap;
mod configurations;
mod deactivate;
mod setup;
mod status;
mod tools;

pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Setup(args) => setup::execute(&args),

        Commands::Bootstrap { code_dir, setup } => bootstrap::execute(&code_dir, &setup),

        Commands::Activate {
            configuration,
            shell,
            repository,
            name,
        } => activate::execute(repository, configuration, name, shell),

        Commands::Deactivate { shell } => deactivate::execute(shell),

        Commands::Configurations { repository, format } => {
            configurations::execute(&repository, format)
        }

        Commands::Tools {
            repository,
            configuration,
            name,
        } => tools::execute(&repository, configuration.as_deref(), name),

        Commands::Status => status::execute(),
    }
}

/// `--name`, then `DEVELOPMENT_ENVIRONMENT_ENVIRONMENT_NAME`, then `DefaultEnv`
fn environment_name(name: Option<String>) -> String {
    name.or_else(|| env::var(ENVIRONMENT_NAME_VAR).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT_NAME.to_string())
}

/// Setup options from the command line, user settings and the process
fn setup_options(args: &SetupArgs, settings: &Settings) -> Result<SetupOptions> {
    let foundation = env::var_os(FOUNDATION_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);

    Ok(SetupOptions {
        repository: args.repository.clone(),
        configurations: args.configurations.clone(),
        environment: environment_name(args.name.clone()),
        force: args.force,
        no_hooks: args.no_hooks,
        platform: Platform::current(),
        binary: env::current_exe()?,
        foundation,
        search: SearchOptions {
            search_depth: args.search_depth.unwrap_or(settings.search_depth),
            max_num_searches: args.max_num_searches.or(settings.max_num_searches),
            required_ancestor_dirs: args.required_ancestor_dirs.clone(),
            home_dir: xdg::home_dir().ok(),
        },
        additional_search_dirs: settings.search_dirs()?,
    })
}
