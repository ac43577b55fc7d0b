use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::manifest::DEFAULT_CONFIGURATION;
use crate::platform::Platform;
use crate::repository::{Repository, RepositoryPath};
use crate::tools::ToolLocator;
use crate::ui;

pub fn execute(repository: &Path, configuration: Option<&str>, name: Option<String>) -> Result<()> {
    let repository = Repository::open(repository)?;
    let environment = super::environment_name(name);
    let platform = Platform::current();

    let pins: BTreeMap<String, String> = match configuration {
        Some(configuration) if configuration != DEFAULT_CONFIGURATION => {
            repository
                .manifest()
                .resolve_configuration(repository.root(), Some(configuration))?
                .tools
        }
        _ => BTreeMap::new(),
    };

    let tools = ToolLocator::discover(&repository.path(RepositoryPath::Tools))?;
    if tools.is_empty() {
        ui::info(format!("'{}' does not provide any tools", repository.name()));
        return Ok(());
    }

    let locator = ToolLocator::new(platform, &environment);
    let width = tools.iter().map(|tool| tool.name.len()).max().unwrap_or(0);
    let mut missing = 0;

    for tool in &tools {
        let pin = pins.get(&tool.name).map(String::as_str);
        match locator.locate(&tool.path, pin) {
            Ok(path) => println!("{:<width$}  {}", tool.name, path.display()),
            Err(err) => {
                missing += 1;
                ui::warn(format!("{:<width$}  {:#}", tool.name, err));
            }
        }
    }

    if missing > 0 {
        ui::warn(format!("{missing} tool(s) not available for {platform}"));
    }
    Ok(())
}
