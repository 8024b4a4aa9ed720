use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use viya_connect::{config::Config, viya};

/// Talk to a Viya deployment with OAuth2 client credentials.
///
/// Credentials and connection settings come from the VIYA_* environment
/// variables.
#[derive(Debug, Parser)]
#[command(name = "viya-connect", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Acquire a token and report how long it stays valid
    Token,
    /// List published MAS modules
    Modules,
    /// List the steps of a MAS module and their inputs
    Steps { module: String },
    /// Score a JSON array of records with a MAS module
    Score {
        module: String,
        /// JSON file holding an array of objects, one per record
        #[arg(short, long)]
        input: PathBuf,
        /// Where to write the scored records
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let mas = viya::connect(&config)?;

    match cli.command {
        Command::Token => {
            let token = mas.auth_token_provider.get_token().await?;
            println!("token acquired, expires in {}s", token.remaining().as_secs());
        }
        Command::Modules => {
            for module in mas.list_modules().await? {
                println!("{}", module);
            }
        }
        Command::Steps { module } => {
            for step in mas.list_steps(&module).await? {
                println!("{}", step.id);
                for input in step.inputs {
                    println!(
                        "  - {}: {}",
                        input.name,
                        input.kind.as_deref().unwrap_or("N/A")
                    );
                }
            }
        }
        Command::Score {
            module,
            input,
            output,
        } => {
            if mas.get_module(&module).await?.is_none() {
                let available = mas.list_modules().await?;
                bail!(
                    "module {:?} not found, available modules: {}",
                    module,
                    available.join(", ")
                );
            }

            let raw = tokio::fs::read(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let records: Vec<viya::mas::Record> = serde_json::from_slice(&raw)
                .with_context(|| format!("{} must hold an array of objects", input.display()))?;
            info!(message = "Read records", count = records.len(), path = %input.display());

            let scored = mas.score_records(&module, &records).await?;

            let body = serde_json::to_vec_pretty(&scored)?;
            tokio::fs::write(&output, body)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            info!(message = "Scored data written", path = %output.display());
        }
    }

    Ok(())
}
