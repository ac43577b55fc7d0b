use anyhow::Result;

use crate::activation::ShellContext;
use crate::cli::ShellArgs;
use crate::deactivation;
use crate::environment::Shell;
use crate::platform::OperatingSystem;
use crate::ui;

pub fn execute(args: ShellArgs) -> Result<()> {
    ui::route_to_stderr();

    let shell = args
        .shell
        .unwrap_or_else(|| Shell::default_for(OperatingSystem::current()));
    let context = ShellContext::from_process(shell, args.invocation)?;
    let fragment = deactivation::run(&context)?;

    ui::status("Deactivated", "environment restored");
    println!("{}", fragment.display());
    Ok(())
}
