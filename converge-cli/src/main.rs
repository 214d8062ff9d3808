use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use converge_core::DriverConfig;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod plan;
mod status;

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "Plan and inspect declarative cloud resource convergence", long_about = None)]
struct Cli {
    /// Driver configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    SecurityGroup,
    VirtualMachine,
    ScaleSet,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the update payload a reconcile pass would send
    Plan {
        /// Resource kind
        #[arg(short, long, value_enum)]
        kind: Kind,

        /// Desired spec (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Observed remote object (JSON); omit when it does not exist
        #[arg(short, long)]
        observed: Option<PathBuf>,

        /// SKU catalog (JSON) used to resolve the spec's size
        #[arg(long)]
        skus: Option<PathBuf>,
    },

    /// Show ownership records and in-flight operations of a saved status
    Status {
        /// Serialized status (JSON)
        file: PathBuf,
    },

    /// Print the effective driver configuration
    Config,
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<DriverConfig> {
    let config = match path {
        Some(path) => read_json(path)?,
        None => DriverConfig::default(),
    };
    config.validate().context("Invalid driver configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "converge=info,converge_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    debug!(?config, "driver configuration loaded");

    match cli.command {
        Commands::Plan {
            kind,
            spec,
            observed,
            skus,
        } => {
            let payload = plan::plan(kind, &spec, observed.as_deref(), skus.as_deref())?;
            match payload {
                Some(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
                None => println!("no changes"),
            }
        }
        Commands::Status { file } => {
            let status = read_json(&file)?;
            print!("{}", status::render(&status));
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
