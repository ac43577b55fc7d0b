use anyhow::Result;
use std::env;

use crate::activation::{
    ACTIVATED_KEY_VAR, CONFIGURATION_VAR, ENVIRONMENT_NAME_VAR, FOUNDATION_VAR, MIXINS_VAR,
    REPOSITORY_VAR,
};
use crate::platform::Platform;
use crate::ui;

pub fn execute() -> Result<()> {
    let var = |name: &str| env::var(name).ok().filter(|value| !value.is_empty());

    let Some(repository) = var(REPOSITORY_VAR) else {
        ui::info("No development environment is active");
        return Ok(());
    };

    ui::status("Repository", &repository);
    if let Some(configuration) = var(CONFIGURATION_VAR) {
        ui::status("Config", configuration);
    }
    if let Some(environment) = var(ENVIRONMENT_NAME_VAR) {
        ui::status("Environment", environment);
    }
    if let Some(foundation) = var(FOUNDATION_VAR) {
        ui::status("Foundation", foundation);
    }
    if let Some(mixins) = var(MIXINS_VAR) {
        for mixin in Platform::current().split_paths(&mixins) {
            ui::status("Mixin", mixin);
        }
    }
    if var(ACTIVATED_KEY_VAR).is_none() {
        ui::warn("The activation key is missing; Deactivate will not be able to restore the shell");
    }

    Ok(())
}
