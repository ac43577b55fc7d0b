use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::cli::ConfigurationFormat;
use crate::repository::Repository;

#[derive(Debug, Serialize)]
struct ConfigurationInfo<'a> {
    name: &'a str,
    description: &'a str,
}

pub fn execute(repository: &Path, format: ConfigurationFormat) -> Result<()> {
    let repository = Repository::open(repository)?;
    let manifest = repository.manifest();

    let configurations: Vec<ConfigurationInfo> = manifest
        .configurations
        .iter()
        .map(|(name, spec)| ConfigurationInfo {
            name,
            description: &spec.description,
        })
        .collect();

    if format == ConfigurationFormat::Json {
        let json = serde_json::to_string_pretty(&configurations)
            .context("Failed to serialize configurations")?;
        println!("{json}");
        return Ok(());
    }

    if !manifest.is_configurable() {
        bail!("'{}' does not have any configurations", manifest.name);
    }

    match format {
        ConfigurationFormat::CommandLine => {
            let names: Vec<&str> = configurations.iter().map(|c| c.name).collect();
            println!("{}", names.join(" "));
        }
        _ => {
            let width = configurations.iter().map(|c| c.name.len()).max().unwrap_or(0);
            for configuration in &configurations {
                println!(
                    "{:<width$}  {}",
                    configuration.name, configuration.description
                );
            }
        }
    }

    Ok(())
}
