//! `clausewise analyze`: run one contract through the engine end to end.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use clausewise_ai::hashing::DEFAULT_DIM;
use clausewise_ai::{EmbeddingService, HashingEmbedder, LanguageModel};
use clausewise_core::{AnalysisConfig, ContractId, CorpusVersion, RunStatus};
use clausewise_engine::{AnalysisService, Orchestrator};
use clausewise_store::{FsDocumentStore, JsonCorpusProvider, JsonReportSink, RuleCorpusProvider};
use tracing::{info, warn};

use crate::display;

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Contract text file.
    pub contract: PathBuf,

    /// Directory of published rule corpus versions.
    #[arg(long, default_value = "data/rules", env = "CLAUSEWISE_CORPUS_DIR")]
    pub corpus_dir: PathBuf,

    /// Pin this corpus version instead of the current one.
    #[arg(long)]
    pub corpus_version: Option<String>,

    /// Directory reports are written to.
    #[arg(long, default_value = "reports", env = "CLAUSEWISE_REPORTS_DIR")]
    pub reports_dir: PathBuf,

    /// ONNX sentence-embedding model directory (`model.onnx` + `tokenizer.json`).
    /// Without it clauses are embedded by feature hashing.
    #[cfg(feature = "onnx")]
    #[arg(long, env = "CLAUSEWISE_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,

    /// Skip rewrite suggestions.
    #[arg(long)]
    pub no_rewrites: bool,

    /// Print the report as JSON instead of a card.
    #[arg(long)]
    pub json: bool,
}

/// Analyse the contract, save and print the report, and return its status.
pub async fn run_analyze(args: &AnalyzeArgs, mut config: AnalysisConfig) -> anyhow::Result<RunStatus> {
    if args.no_rewrites {
        config.rewrites_enabled = false;
    }
    let (root, contract_id) = locate_contract(&args.contract)?;

    let mut builder = Orchestrator::builder(config, embeddings(args)?);
    match language_model() {
        Some(model) => builder = builder.language_model(model),
        None => warn!("no language model configured (set CLAUSEWISE_LLM_API_KEY); rewrites disabled"),
    }
    let orchestrator = builder.build().context("invalid analysis configuration")?;

    let service = AnalysisService::new(
        Arc::new(FsDocumentStore::new(root)),
        open_corpora(&args.corpus_dir)?,
        Arc::new(JsonReportSink::new(&args.reports_dir)),
        orchestrator,
    );
    let version = args.corpus_version.as_deref().map(CorpusVersion::new);
    let saved = service
        .analyze(&contract_id, version.as_ref())
        .await
        .with_context(|| format!("analysing {}", args.contract.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&saved.report)?);
    } else {
        display::print_report_card(&saved.report)?;
    }
    info!(location = %saved.location, "report written");
    Ok(saved.report.run_status())
}

/// Split a contract path into the document root and the contract id.
fn locate_contract(path: &Path) -> anyhow::Result<(PathBuf, ContractId)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("not a contract file: {}", path.display()))?;
    let root = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((root, ContractId::new(name)))
}

#[cfg(feature = "parquet")]
fn open_corpora(dir: &Path) -> anyhow::Result<Arc<dyn RuleCorpusProvider>> {
    let has_parquet = std::fs::read_dir(dir)
        .with_context(|| format!("reading corpus directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .any(|e| e.path().extension().is_some_and(|ext| ext == "parquet"));
    if has_parquet {
        let provider = clausewise_store::ParquetCorpusProvider::open(dir)
            .with_context(|| format!("loading parquet corpora from {}", dir.display()))?;
        return Ok(Arc::new(provider));
    }
    Ok(Arc::new(JsonCorpusProvider::new(dir)))
}

#[cfg(not(feature = "parquet"))]
fn open_corpora(dir: &Path) -> anyhow::Result<Arc<dyn RuleCorpusProvider>> {
    Ok(Arc::new(JsonCorpusProvider::new(dir)))
}

#[cfg(feature = "onnx")]
fn embeddings(args: &AnalyzeArgs) -> anyhow::Result<Arc<dyn EmbeddingService>> {
    if let Some(dir) = &args.model_dir {
        let embedder = clausewise_ai::OnnxEmbedder::load(dir)
            .with_context(|| format!("loading ONNX model from {}", dir.display()))?;
        info!(dim = embedder.dim(), "onnx embedder loaded");
        return Ok(Arc::new(embedder));
    }
    Ok(Arc::new(HashingEmbedder::new(DEFAULT_DIM)))
}

#[cfg(not(feature = "onnx"))]
fn embeddings(_args: &AnalyzeArgs) -> anyhow::Result<Arc<dyn EmbeddingService>> {
    Ok(Arc::new(HashingEmbedder::new(DEFAULT_DIM)))
}

#[cfg(feature = "http")]
fn language_model() -> Option<Arc<dyn LanguageModel>> {
    let client = clausewise_ai::MessagesClient::from_env()?;
    info!(model = client.model(), "language model configured");
    Some(Arc::new(client))
}

#[cfg(not(feature = "http"))]
fn language_model() -> Option<Arc<dyn LanguageModel>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_path_splits_into_root_and_id() {
        let (root, id) = locate_contract(Path::new("contracts/msa-2025.txt")).unwrap();
        assert_eq!(root, PathBuf::from("contracts"));
        assert_eq!(id.as_str(), "msa-2025.txt");

        let (root, id) = locate_contract(Path::new("nda.txt")).unwrap();
        assert_eq!(root, PathBuf::from("."));
        assert_eq!(id.as_str(), "nda.txt");
    }

    #[test]
    fn directory_like_path_is_rejected() {
        assert!(locate_contract(Path::new("..")).is_err());
    }

    #[tokio::test]
    async fn analyzes_contract_against_json_corpus() {
        let tmp = tempfile::TempDir::new().unwrap();
        let rules = tmp.path().join("rules");
        std::fs::create_dir_all(&rules).unwrap();
        std::fs::write(
            rules.join("v1.json"),
            r#"{"version": "v1", "rules": [{
                "id": "GDPR-5.1e", "regulation": "GDPR", "jurisdiction": "EU",
                "category": "data_protection", "severity": 5,
                "description": "Personal data must not be kept longer than necessary.",
                "keywords": ["personal data", "retain"]
            }]}"#,
        )
        .unwrap();
        let contract = tmp.path().join("msa.txt");
        std::fs::write(
            &contract,
            "1. Supplier may retain personal data indefinitely.\n\n2. Fees are due monthly.\n",
        )
        .unwrap();

        let args = AnalyzeArgs {
            contract,
            corpus_dir: rules,
            corpus_version: None,
            reports_dir: tmp.path().join("reports"),
            #[cfg(feature = "onnx")]
            model_dir: None,
            no_rewrites: true,
            json: true,
        };
        let status = run_analyze(&args, AnalysisConfig::default()).await.unwrap();
        assert_ne!(status, RunStatus::Failed);
        let saved = std::fs::read_dir(tmp.path().join("reports")).unwrap().count();
        assert_eq!(saved, 1);
    }
}
