mod load;
mod scan;

use clap::{Parser, Subcommand};
use crossload_core::DelegationConfig;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "crossload",
    version,
    about = "Cross-module class and resource delegation",
    long_about = "Crossload publishes the classes and resources that modules declare as providable \
                  and loads them on behalf of other modules, narrowed by context and version."
)]
pub struct Cli {
    /// JSON delegation settings; CROSSLOAD_* environment variables override it
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start every module under a directory and list what they provide
    #[command(
        long_about = "Each subdirectory holding a module.json manifest is installed and started. \
                      The published provider records are printed as a table."
    )]
    Scan {
        /// Directory containing one subdirectory per module
        #[arg(value_name = "MODULES_DIR")]
        dir: PathBuf,
    },
    /// Load a class by name from whichever module provides it
    Load {
        /// Directory containing one subdirectory per module
        #[arg(value_name = "MODULES_DIR")]
        dir: PathBuf,
        /// Class name or alias to load
        #[arg(value_name = "NAME")]
        name: String,
        /// Only consider providers published in this context
        #[arg(long)]
        context: Option<String>,
        /// Only consider providers of this version
        #[arg(long = "provider-version", value_name = "VERSION")]
        version: Option<String>,
        /// How long to wait for a provider
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },
}

fn load_config(path: Option<&Path>) -> Result<DelegationConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => DelegationConfig::load(path)?,
        None => DelegationConfig::default(),
    };
    Ok(config.apply_env_overrides()?)
}

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let _guard = crossload_runtime::init_logging("cli", &config, true);

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Scan { dir } => rt.block_on(scan::run(dir, config)),
        Commands::Load {
            dir,
            name,
            context,
            version,
            timeout_ms,
        } => rt.block_on(load::run(
            dir,
            config,
            load::Request {
                name,
                context,
                version,
                timeout_ms,
            },
        )),
    }
}
