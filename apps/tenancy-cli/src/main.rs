//! Tenancy CLI
//!
//! Operator front end for the tenant provisioning library.

mod app;
mod cli;
mod commands;
mod output;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

use crate::cli::{Args, Commands};
use crate::output::OutputFormat;
use crate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let args = Args::parse();

    if args.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = init_telemetry(&args) {
        output::error(&format!("{:#}", e));
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let format: OutputFormat = args.format.parse().map_err(anyhow::Error::msg)?;
    let settings = app::load_settings(args.config.as_deref())?;
    let provisioner = app::build_provisioner(settings).await?;

    match args.command {
        Commands::Provision {
            file,
            no_rollback,
            skip_validation,
            seed_data,
            create_db_user,
            no_env_file,
        } => {
            let mut options = provisioner.default_options();
            if no_rollback {
                options = options.without_rollback();
            }
            if skip_validation {
                options = options.without_validation();
            }
            if seed_data {
                options = options.with_seed_data();
            }
            if create_db_user {
                options = options.with_database_user();
            }
            if no_env_file {
                options = options.without_env_file();
            }

            commands::provision::run(&provisioner, &file, &options, format).await
        }
        Commands::Deprovision { id, backup } => {
            commands::deprovision::run(&provisioner, &id, backup, format).await
        }
        Commands::Status { id } => commands::status::run(&provisioner, &id, format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert()
    }
}
