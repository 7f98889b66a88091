//! # Contract Advisor CLI (`advisor`)
//!
//! ```bash
//! advisor --config ./config/advisor.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `advisor analyze <file>` | Risks, summary and answers for one document |
//! | `advisor analyze <file> --review` | Sectioned provisions/risks/recommendations review |
//! | `advisor ingest --user <id> <file>...` | Upload files into a user's session and store |
//! | `advisor chat --user <id>` | Interactive advisory conversation |
//! | `advisor clear --user <id>` | Delete a user's vector store and hash ledger |
//! | `advisor contract --type <t> ...` | Draft a contract |
//!
//! Results are printed to stdout as `{"success": ..}` JSON envelopes. Logs
//! go to stderr and are filtered with `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use contract_advisor::config::{self, Config};
use contract_advisor::contract::ContractRequest;
use contract_advisor::models::UserId;
use contract_advisor::{Advisor, Envelope, Result};

#[derive(Parser)]
#[command(
    name = "advisor",
    about = "Contract advisor: document analysis, retrieval-augmented chat, and contract recommendations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/advisor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a DOCX, PDF or TXT document.
    Analyze {
        file: PathBuf,

        /// Produce the sectioned review instead of the risk/summary analysis.
        #[arg(long)]
        review: bool,
    },

    /// Upload documents into a user's session (memory and vector store).
    Ingest {
        #[arg(long)]
        user: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Start an interactive conversation.
    ///
    /// Besides free text, the prompt accepts `load <path>`, `rag on`,
    /// `rag off`, `release`, `recommend`, and `exit`.
    Chat {
        #[arg(long)]
        user: String,
    },

    /// Delete a user's vector store contents and hash ledger.
    Clear {
        #[arg(long)]
        user: String,
    },

    /// Draft a contract.
    Contract {
        /// Contract type, e.g. `service`, `supply`, `lease`.
        #[arg(long = "type")]
        contract_type: Option<String>,

        #[arg(long, num_args = 1..)]
        parties: Vec<String>,

        #[arg(long)]
        terms: Option<String>,

        #[arg(long, default_value = "")]
        context: String,
    },
}

#[derive(Serialize)]
struct Message {
    message: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Ok(config::load_config(path)?)
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

fn print<T: Serialize>(result: Result<T>) -> anyhow::Result<()> {
    let envelope = Envelope::from(result);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

fn read_file(path: &Path) -> Result<(String, Vec<u8>)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bytes = std::fs::read(path)?;
    Ok((name, bytes))
}

async fn upload_path(advisor: &Advisor, user: &UserId, path: &Path) -> anyhow::Result<()> {
    let result = match read_file(path) {
        Ok((name, bytes)) => advisor.upload(user, &name, bytes).await,
        Err(e) => Err(e),
    };
    print(result)
}

async fn run_chat(advisor: &Advisor, user: &UserId) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Chatting as '{}'. Type 'exit' to quit.", user);

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "exit" | "quit" => break,
            "rag on" => print(advisor.toggle_rag(user, true).await)?,
            "rag off" => print(advisor.toggle_rag(user, false).await)?,
            "release" => print(advisor.release(user).await.map(|n| Message {
                message: format!("released {} document(s) from memory", n),
            }))?,
            "recommend" => print(advisor.recommend(user).await)?,
            _ => {
                if let Some(path) = line.strip_prefix("load ") {
                    upload_path(advisor, user, Path::new(path.trim())).await?;
                    continue;
                }
                match advisor.chat(user, line).await {
                    Ok(outcome) => {
                        println!("{}", outcome.response);
                        if outcome.ready_for_recommendation {
                            eprintln!("(ready for a recommendation: type 'recommend')");
                        }
                    }
                    Err(e) => print::<()>(Err(e))?,
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let advisor = Advisor::from_config(cfg)?;

    match cli.command {
        Commands::Analyze { file, review } => {
            let result = match read_file(&file) {
                Ok((name, bytes)) if review => advisor.review(&name, &bytes).await,
                Ok((name, bytes)) => advisor.analyze(&name, &bytes).await,
                Err(e) => Err(e),
            };
            print(result)?;
        }
        Commands::Ingest { user, files } => {
            let user = UserId::parse(&user)?;
            for file in &files {
                upload_path(&advisor, &user, file).await?;
            }
        }
        Commands::Chat { user } => {
            let user = UserId::parse(&user)?;
            run_chat(&advisor, &user).await?;
        }
        Commands::Clear { user } => {
            let user = UserId::parse(&user)?;
            print(advisor.clear_user_data(&user).await.map(|_| Message {
                message: "User data cleared successfully".to_string(),
            }))?;
        }
        Commands::Contract {
            contract_type,
            parties,
            terms,
            context,
        } => {
            let request = ContractRequest {
                contract_type,
                parties,
                key_terms: terms,
                additional_context: context,
            };
            print(advisor.generate_contract(&request).await)?;
        }
    }

    Ok(())
}
