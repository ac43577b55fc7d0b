use anyhow::Result;

use crate::cli::SetupArgs;
use crate::config::Settings;
use crate::setup::{self, SetupOutcome};
use crate::ui;

pub fn execute(args: &SetupArgs) -> Result<()> {
    let settings = Settings::load_default()?;
    let options = super::setup_options(args, &settings)?;

    match setup::run(&options)? {
        SetupOutcome::AlreadySetUp(dir) => {
            ui::info(format!(
                "'{}' is already set up in {}; use --force to set it up again",
                options.environment,
                dir.display()
            ));
        }
        SetupOutcome::Completed(dir) => {
            ui::success("Setup", format!("'{}' in {}", options.environment, dir.display()));
        }
    }

    Ok(())
}
