//! Command-line entry point.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::bootstrap::{ServerOptions, run_server, run_worker};
use crate::error::AppResult;

#[derive(Debug, Parser)]
#[command(name = "seedbank", version, about = "Seedbank control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the seedbank server.
    Server(ServerArgs),
    /// Run one worker session; started by the server.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Debug, Args)]
struct ServerArgs {
    /// Configuration file (defaults to the standard search paths).
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
    /// Enable debug logging.
    #[arg(long, short = 'v')]
    verbose: bool,
    /// Shut down when the control input on stdin closes.
    #[arg(long)]
    exit_on_control_eof: bool,
}

#[derive(Debug, Args)]
struct WorkerArgs {
    /// JSON-encoded worker parameters.
    #[arg(long)]
    params: String,
}

/// Parse arguments and run the selected command.
///
/// # Errors
///
/// Returns the error of the selected command.
pub async fn run() -> AppResult<()> {
    match Cli::parse().command {
        Command::Server(args) => {
            run_server(ServerOptions {
                config: args.config,
                verbose: args.verbose,
                exit_on_control_eof: args.exit_on_control_eof,
            })
            .await
        }
        Command::Worker(args) => run_worker(&args.params).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn server_arguments_parse() {
        let cli = Cli::parse_from(["seedbank", "server", "--config", "/etc/seedbank.yaml", "-v"]);
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        assert_eq!(args.config, Some(PathBuf::from("/etc/seedbank.yaml")));
        assert!(args.verbose);
        assert!(!args.exit_on_control_eof);

        let cli = Cli::parse_from(["seedbank", "server", "--exit-on-control-eof"]);
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        assert!(args.exit_on_control_eof);
    }

    #[test]
    fn worker_requires_params() {
        assert!(Cli::try_parse_from(["seedbank", "worker"]).is_err());
        let cli = Cli::parse_from(["seedbank", "worker", "--params", "{}"]);
        assert!(matches!(cli.command, Command::Worker(WorkerArgs { ref params }) if params == "{}"));
    }
}
