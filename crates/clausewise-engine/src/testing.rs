//! Deterministic collaborators and fixtures for engine tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clausewise_ai::{EmbeddingService, GenerateRequest, Generation, LanguageModel, ServiceError};
use clausewise_core::{
    AnalysisConfig, Contract, ContractId, CorpusVersion, RegulatoryRule, RuleCorpus, RuleId,
};
use tokio::sync::{Semaphore, mpsc};

/// Clauses 0 and 2 hit a severity-5 rule (high risk); clause 1 only a
/// severity-1 rule (low risk).
pub const CONTRACT: &str = "1. Supplier may retain personal data indefinitely.\n\n\
    2. Customer shall pay each invoice within 30 days.\n\n\
    3. Supplier may share personal data with affiliates.\n";

pub fn contract() -> Contract {
    Contract::ingest(ContractId::new("msa-2025"), CONTRACT)
}

/// `n` clauses, each high risk and with distinct text.
pub fn long_contract(n: usize) -> Contract {
    let text: String = (1..=n)
        .map(|i| format!("{i}. Supplier may retain personal data for purpose {i}.\n\n"))
        .collect();
    Contract::ingest(ContractId::new("long"), text)
}

fn rule(id: &str, severity: u8, description: &str, keywords: &[&str]) -> RegulatoryRule {
    RegulatoryRule {
        id: RuleId::new(id),
        regulation: if severity >= 3 { "GDPR" } else { "VAT" }.into(),
        jurisdiction: "EU".into(),
        category: if severity >= 3 { "data_protection" } else { "invoicing" }.into(),
        severity,
        description: description.into(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        effective_from: None,
        effective_to: None,
    }
}

pub fn corpus_at(version: &str) -> Arc<RuleCorpus> {
    Arc::new(
        RuleCorpus::new(
            CorpusVersion::new(version),
            vec![
                rule(
                    "GDPR-5.1e",
                    5,
                    "Personal data must not be kept longer than necessary.",
                    &["personal data"],
                ),
                rule("VAT-226", 1, "Invoices must state payment terms.", &["invoice"]),
            ],
        )
        .unwrap(),
    )
}

pub fn corpus() -> Arc<RuleCorpus> {
    corpus_at("2025.1")
}

pub fn config() -> AnalysisConfig {
    AnalysisConfig {
        rewrite_max_retries: 0,
        rewrite_backoff_ms: 1,
        ..AnalysisConfig::default()
    }
}

// ── Embeddings ──

/// Every text maps to the same vector, so confidence is decided by keyword
/// coverage alone. Texts containing `fail_on` error, `panic_on` panics and
/// `stall_on` never answers.
#[derive(Default)]
pub struct FakeEmbedder {
    pub fail_on: Option<&'static str>,
    pub panic_on: Option<&'static str>,
    pub stall_on: Option<&'static str>,
    single: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(needle: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(needle),
            ..Self::default()
        })
    }

    pub fn panicking_on(needle: &'static str) -> Arc<Self> {
        Arc::new(Self {
            panic_on: Some(needle),
            ..Self::default()
        })
    }

    pub fn stalling_on(needle: &'static str) -> Arc<Self> {
        Arc::new(Self {
            stall_on: Some(needle),
            ..Self::default()
        })
    }

    /// Clause embeddings requested so far.
    pub fn clause_calls(&self) -> usize {
        self.single.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for FakeEmbedder {
    fn model(&self) -> &str {
        "fake-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.single.fetch_add(1, Ordering::SeqCst);
        if self.panic_on.is_some_and(|n| text.contains(n)) {
            panic!("embedder blew up");
        }
        if self.fail_on.is_some_and(|n| text.contains(n)) {
            return Err(ServiceError::Unavailable("embedding backend down".into()));
        }
        if self.stall_on.is_some_and(|n| text.contains(n)) {
            std::future::pending::<()>().await;
        }
        Ok(vec![1.0, 0.0])
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

// ── Language model ──

pub const REPLY: &str = r#"{"suggested_text": "Personal data is deleted within 30 days of termination.", "rationale": "Bounds retention."}"#;

/// Language model with optional latency, a gate that holds every call until
/// released, and a notification when a call starts.
#[derive(Default)]
pub struct FakeModel {
    pub fail: bool,
    pub delay: Duration,
    pub gate: Option<Arc<Semaphore>>,
    pub entered: Option<mpsc::UnboundedSender<()>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeModel {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    /// Every call takes `delay` before answering.
    pub fn delayed(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Every call reports on `entered`, then waits for a permit on `gate`.
    pub fn gated(gate: Arc<Semaphore>, entered: mpsc::UnboundedSender<()>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            entered: Some(entered),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were ever outstanding at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn generate(&self, _request: &GenerateRequest) -> Result<Generation, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(entered) = &self.entered {
            let _ = entered.send(());
        }
        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ServiceError::Unavailable("model offline".into()));
        }
        Ok(Generation {
            text: REPLY.into(),
            model: "fake-model-1".into(),
        })
    }
}
