//! socketauth - SSH agent over HTTP with repository-scoped keys

use clap::{CommandFactory, Parser};
use clap_complete::env::CompleteEnv;
use std::process::ExitCode;

use socketauth::cli::commands;
use socketauth::cli::exit_code::ExitCode as SocketauthExit;
use socketauth::cli::{Cli, Commands};
use socketauth::logging::{self, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    // Handle dynamic shell completion if COMPLETE env var is set
    CompleteEnv::with_factory(Cli::command).complete();

    let cli = Cli::parse();
    logging::init(&LogConfig::from_flags(cli.verbose, cli.quiet));

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.config).await,
        Commands::Serve(args) => commands::serve::execute(args, cli.config).await.map(|()| 0),
        Commands::Config(args) => commands::config::execute(args, cli.config).map(|()| 0),
        Commands::Version(args) => {
            commands::version::execute(args);
            Ok(0)
        }
        Commands::Completion(args) => commands::completion::execute(args).map(|()| 0),
    };

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            SocketauthExit::for_error(&e).into()
        }
    }
}
