use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::SetupArgs;
use crate::config::Settings;
use crate::repository::Repository;
use crate::setup::{self, SetupOutcome};
use crate::ui;

pub fn execute(code_dir: &Path, args: &SetupArgs) -> Result<()> {
    let settings = Settings::load_default()?;
    let options = super::setup_options(args, &settings)?;
    let repository = Repository::open(&options.repository)?;

    let dependencies = setup::enlist(&repository, code_dir, &options.search)
        .with_context(|| format!("Failed to enlist dependencies in {:?}", code_dir))?;
    let code_dir = code_dir.canonicalize()?;

    let mut search = options.search.clone();
    search.required_ancestor_dirs = vec![code_dir, repository.root().to_path_buf()];

    for root in &dependencies {
        let dependency = setup::SetupOptions {
            repository: root.clone(),
            configurations: Vec::new(),
            search: search.clone(),
            ..options.clone()
        };
        report(root, setup::run(&dependency)?);
    }

    let target = setup::SetupOptions {
        search,
        ..options.clone()
    };
    report(repository.root(), setup::run(&target)?);

    Ok(())
}

fn report(root: &Path, outcome: SetupOutcome) {
    match outcome {
        SetupOutcome::AlreadySetUp(_) => ui::info(format!("{} is already set up", root.display())),
        SetupOutcome::Completed(_) => ui::success("Setup", root.display()),
    }
}
