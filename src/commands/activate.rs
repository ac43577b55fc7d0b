use anyhow::Result;
use std::path::PathBuf;

use crate::activation::{Activation, ActivationPlan, ActivationRequest, ShellContext};
use crate::cli::ShellArgs;
use crate::environment::Shell;
use crate::platform::OperatingSystem;
use crate::ui;

pub fn execute(
    repository: PathBuf,
    configuration: Option<String>,
    name: Option<String>,
    args: ShellArgs,
) -> Result<()> {
    ui::route_to_stderr();

    let shell = args
        .shell
        .unwrap_or_else(|| Shell::default_for(OperatingSystem::current()));
    let context = ShellContext::from_process(shell, args.invocation)?;
    let request = ActivationRequest {
        repository,
        configuration,
        environment: name,
    };

    let outcome = Activation::new(&context).run(&request)?;
    summarize(&outcome.plan);

    // Read by the wrapper script
    println!("{}", outcome.fragment.display());
    Ok(())
}

fn summarize(plan: &ActivationPlan) {
    let rows: Vec<Vec<String>> = plan
        .repositories
        .iter()
        .map(|repository| {
            let role = if repository.is_mixin {
                "mixin".to_string()
            } else {
                repository
                    .configuration
                    .clone()
                    .unwrap_or_else(|| "-".to_string())
            };
            vec![
                repository.name.clone(),
                role,
                repository.root.display().to_string(),
            ]
        })
        .collect();

    ui::table("Activated", &rows);
    tracing::info!(
        "{} path entries, {} tools",
        plan.composition.path.len(),
        plan.composition.tools.len()
    );
}
