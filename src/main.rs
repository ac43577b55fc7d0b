use clap::Parser;
use devenv::cli::Cli;
use devenv::platform::OperatingSystem;
use devenv::{commands, ui, DevEnvError};

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "devenv=debug"
    } else if cli.verbose {
        "devenv=info"
    } else {
        "devenv=warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    // stdout is reserved for command output and fragment paths
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let script = format!(
        "{}.{}",
        cli.command.script_name(),
        OperatingSystem::current().script_extension()
    );

    if let Err(err) = commands::execute(cli) {
        let message = match err
            .chain()
            .find_map(|cause| cause.downcast_ref::<DevEnvError>())
        {
            Some(domain) => format!("{} ({})", domain, domain.kind()),
            None => err.root_cause().to_string(),
        };

        ui::error(message);
        ui::pointer(format!("{script}: {err}"));
        std::process::exit(-1);
    }
}
