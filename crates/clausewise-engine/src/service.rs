//! End-to-end analysis: load the contract, pin a corpus, run, persist.

use std::sync::{Arc, Mutex, PoisonError};

use clausewise_core::{ComplianceReport, Contract, ContractId, CorpusVersion};
use clausewise_store::{DocumentStore, ReportSink, RuleCorpusProvider, StoreError};
use thiserror::Error;
use tracing::info;

use crate::orchestrator::Orchestrator;

/// Collaborator failures around a run. Problems inside the run itself are
/// reported in the [`ComplianceReport`], never here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load contract {contract}: {source}")]
    Document {
        contract: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to pin rule corpus: {0}")]
    Corpus(#[source] StoreError),

    #[error("failed to save report {report}: {source}")]
    Sink {
        report: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug)]
pub struct SavedReport {
    pub report: ComplianceReport,
    /// Where the sink put it.
    pub location: String,
}

pub struct AnalysisService {
    documents: Arc<dyn DocumentStore>,
    corpora: Arc<dyn RuleCorpusProvider>,
    sink: Arc<dyn ReportSink>,
    orchestrator: Orchestrator,
    /// Last current version seen; a change rotates the orchestrator caches.
    current: Mutex<Option<CorpusVersion>>,
}

impl AnalysisService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        corpora: Arc<dyn RuleCorpusProvider>,
        sink: Arc<dyn ReportSink>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            documents,
            corpora,
            sink,
            orchestrator,
            current: Mutex::new(None),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Analyse a stored contract against `version`, or the current corpus
    /// when `None`, and save the report.
    pub async fn analyze(
        &self,
        contract_id: &ContractId,
        version: Option<&CorpusVersion>,
    ) -> Result<SavedReport, EngineError> {
        let text = self
            .documents
            .get_contract(contract_id)
            .await
            .map_err(|source| EngineError::Document {
                contract: contract_id.to_string(),
                source,
            })?;
        let corpus = self
            .corpora
            .get_corpus(version)
            .await
            .map_err(EngineError::Corpus)?;
        if version.is_none() {
            self.observe_current(corpus.version());
        }
        info!(
            contract = %contract_id,
            corpus_version = %corpus.version(),
            rules = corpus.len(),
            "corpus pinned"
        );

        let contract = Contract::ingest(contract_id.clone(), text);
        let report = self.orchestrator.run(contract, corpus).await;
        let location = self
            .sink
            .save(&report)
            .await
            .map_err(|source| EngineError::Sink {
                report: report.report_id().to_string(),
                source,
            })?;
        Ok(SavedReport { report, location })
    }

    fn observe_current(&self, version: &CorpusVersion) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref() == Some(version) {
            return;
        }
        if let Some(previous) = current.replace(version.clone()) {
            info!(from = %previous, to = %version, "corpus rotated");
            self.orchestrator.retain_version(version);
        }
    }
}
