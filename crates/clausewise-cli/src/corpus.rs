//! `clausewise corpus`: inspect and publish rule corpus versions.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use clausewise_core::{CorpusVersion, RuleCorpus};
use clausewise_store::{JsonCorpusProvider, RuleCorpusProvider};

use crate::display;

#[derive(Args, Debug)]
pub struct CorpusArgs {
    /// Directory of published rule corpus versions.
    #[arg(long, default_value = "data/rules", env = "CLAUSEWISE_CORPUS_DIR")]
    pub dir: PathBuf,

    #[command(subcommand)]
    pub command: CorpusCommand,
}

#[derive(Subcommand, Debug)]
pub enum CorpusCommand {
    /// List published versions; the current one is starred.
    List,

    /// Print the rules of a version (default: current).
    Show { corpus_version: Option<String> },

    /// Publish a rule file as a new version and make it current.
    Publish {
        /// JSON corpus (`{"version": ..., "rules": [...]}`) or a Parquet rule table.
        file: PathBuf,

        /// Version to publish as. Required for Parquet input; overrides the
        /// version inside a JSON file.
        #[arg(long)]
        corpus_version: Option<String>,
    },
}

pub async fn run_corpus(args: &CorpusArgs) -> anyhow::Result<()> {
    let provider = JsonCorpusProvider::new(&args.dir);
    match &args.command {
        CorpusCommand::List => {
            let versions = provider.versions().await?;
            if versions.is_empty() {
                println!("No corpus versions in {}", args.dir.display());
                return Ok(());
            }
            let current = provider.current_version().await.ok();
            for v in versions {
                let marker = if current.as_ref() == Some(&v) { "*" } else { " " };
                println!("{marker} {v}");
            }
        }
        CorpusCommand::Show { corpus_version } => {
            let version = corpus_version.as_deref().map(CorpusVersion::new);
            let corpus = provider
                .get_corpus(version.as_ref())
                .await
                .context("loading corpus")?;
            display::print_corpus(&corpus)?;
        }
        CorpusCommand::Publish {
            file,
            corpus_version,
        } => {
            let corpus = read_rule_file(file, corpus_version.as_deref())?;
            let path = provider.publish(&corpus).await?;
            println!(
                "Published {} ({} rules) to {}",
                corpus.version(),
                corpus.len(),
                path.display()
            );
        }
    }
    Ok(())
}

/// Load and validate a rule file for publishing.
fn read_rule_file(file: &Path, version: Option<&str>) -> anyhow::Result<RuleCorpus> {
    if file.extension().is_some_and(|e| e == "parquet") {
        let Some(version) = version else {
            bail!("--corpus-version is required for Parquet input");
        };
        return read_parquet_rules(file, CorpusVersion::new(version));
    }

    let raw = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let parsed: RuleCorpus =
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", file.display()))?;
    let version = version
        .map(CorpusVersion::new)
        .unwrap_or_else(|| parsed.version().clone());
    Ok(RuleCorpus::new(version, parsed.rules().to_vec())?)
}

#[cfg(feature = "parquet")]
fn read_parquet_rules(file: &Path, version: CorpusVersion) -> anyhow::Result<RuleCorpus> {
    let batches = clausewise_store::read_parquet(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let rules = clausewise_store::rules_from_batches(&batches)?;
    Ok(RuleCorpus::new(version, rules)?)
}

#[cfg(not(feature = "parquet"))]
fn read_parquet_rules(file: &Path, _version: CorpusVersion) -> anyhow::Result<RuleCorpus> {
    bail!(
        "{}: Parquet input needs a build with the `parquet` feature",
        file.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RULES: &str = r#"{"version": "draft", "rules": [
        {"id": "HIPAA-164.502", "regulation": "HIPAA", "jurisdiction": "US",
         "category": "health_privacy", "severity": 5,
         "description": "PHI may only be disclosed as permitted."}
    ]}"#;

    #[test]
    fn json_file_version_can_be_overridden() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("rules.json");
        std::fs::write(&file, RULES).unwrap();

        assert_eq!(read_rule_file(&file, None).unwrap().version().as_str(), "draft");
        let corpus = read_rule_file(&file, Some("2025.2")).unwrap();
        assert_eq!(corpus.version().as_str(), "2025.2");
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("rules.json");
        std::fs::write(
            &file,
            RULES.replace(r#""severity": 5"#, r#""severity": 9"#),
        )
        .unwrap();
        assert!(read_rule_file(&file, None).is_err());
    }

    #[test]
    fn parquet_input_needs_a_version() {
        let err = read_rule_file(Path::new("rules.parquet"), None).unwrap_err();
        assert!(err.to_string().contains("--corpus-version"));
    }

    #[tokio::test]
    async fn publish_makes_version_current() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("rules.json");
        std::fs::write(&file, RULES).unwrap();
        let args = CorpusArgs {
            dir: tmp.path().join("corpora"),
            command: CorpusCommand::Publish {
                file,
                corpus_version: Some("2025.1".into()),
            },
        };
        run_corpus(&args).await.unwrap();

        let provider = JsonCorpusProvider::new(tmp.path().join("corpora"));
        assert_eq!(provider.current_version().await.unwrap().as_str(), "2025.1");
        // Published versions are write-once.
        assert!(run_corpus(&args).await.is_err());
    }
}
