//! Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tenancy",
    about = "Tenant resource provisioning",
    version,
    long_about = "Provision and tear down per-tenant database, storage and \
                  configuration resources.\n\n\
                  Settings are read from TENANCY__* environment variables \
                  (e.g. TENANCY__STORAGE__BASE_PATH) or from --config."
)]
pub struct Args {
    /// Path to a settings file (toml, yaml or json)
    #[arg(short, long, env = "TENANCY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "warn",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    /// Output format (text, json, yaml)
    #[arg(
        short,
        long,
        default_value = "text",
        value_parser = ["text", "json", "yaml"]
    )]
    pub format: String,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Provision a tenant from a JSON or YAML descriptor file
    Provision {
        /// Tenant descriptor file
        file: PathBuf,

        /// Leave partial resources in place on failure
        #[arg(long)]
        no_rollback: bool,

        /// Skip tenant data validation
        #[arg(long)]
        skip_validation: bool,

        /// Insert baseline settings rows
        #[arg(long)]
        seed_data: bool,

        /// Create a scoped user for separate databases
        #[arg(long)]
        create_db_user: bool,

        /// Do not write the .env file
        #[arg(long)]
        no_env_file: bool,
    },

    /// Remove every resource of a tenant
    Deprovision {
        /// Tenant ID
        id: String,

        /// Back up storage and configuration before removal
        #[arg(short, long)]
        backup: bool,
    },

    /// Show provisioning status of a tenant
    Status {
        /// Tenant ID
        id: String,
    },
}
