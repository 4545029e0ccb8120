mod analyze;
mod corpus;
mod display;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use clausewise_core::{AnalysisConfig, Contract, ContractId, RunStatus, segment};
use tracing_subscriber::EnvFilter;

use crate::analyze::AnalyzeArgs;
use crate::corpus::CorpusArgs;

/// Contract compliance analysis: segment a contract into clauses, match them
/// against a versioned regulatory rule corpus, score risk and suggest
/// rewrites.
#[derive(Parser, Debug)]
#[command(name = "clausewise", version, about, long_about = None)]
struct Cli {
    /// Analysis configuration file (JSON). `CLAUSEWISE_*` variables override it.
    #[arg(long, global = true, env = "CLAUSEWISE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyse a contract and write a compliance report.
    Analyze(AnalyzeArgs),

    /// Show how a contract splits into clauses.
    Segment {
        contract: PathBuf,

        /// Print clauses as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect and publish rule corpus versions.
    Corpus(CorpusArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!("clausewise v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Analyze(args) => {
            let config = load_config(cli.config.as_deref())?;
            let status = analyze::run_analyze(&args, config).await?;
            Ok(exit_code(status))
        }
        Commands::Segment { contract, json } => {
            run_segment(&contract, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Corpus(args) => {
            corpus::run_corpus(&args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AnalysisConfig> {
    let base = match path {
        Some(p) => AnalysisConfig::from_file(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => AnalysisConfig::default(),
    };
    Ok(base.with_env()?)
}

/// 0 complete, 3 partial, 2 failed.
fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Complete => ExitCode::SUCCESS,
        RunStatus::Partial => ExitCode::from(3),
        RunStatus::Failed => ExitCode::from(2),
    }
}

fn run_segment(path: &Path, json: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("contract");
    let contract = Contract::ingest(ContractId::new(id), text);
    let clauses = segment(&contract)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&clauses)?);
    } else {
        display::print_clauses(&clauses)?;
    }
    Ok(())
}
