use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use svc_db::DbError;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod graph;

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    match commands::run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            let fatal = e.chain().any(|cause| {
                cause
                    .downcast_ref::<DbError>()
                    .is_some_and(DbError::is_fatal)
            });
            if fatal {
                eprintln!("the database could not be read completely; nothing was written");
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
