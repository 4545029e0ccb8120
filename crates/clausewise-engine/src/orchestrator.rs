//! Analysis orchestration: segment a contract, run one unit per clause, and
//! assemble the report.
//!
//! A run moves through
//!
//! ```text
//! Pending → Segmenting → Analyzing → Assembling → Completed
//!                 │                      ├──────→ PartiallyCompleted
//!                 └──────→ Failed ←──────┘
//! ```
//!
//! Clause units run concurrently on a [`JoinSet`], at most
//! `max_concurrent_clauses` at a time. Each unit is
//! cache lookup → matcher → cache insert → scorer → rewrite, within a
//! deadline of `clause_timeout_ms`. Matching and scoring past the deadline
//! time the clause out; a rewrite still waiting or retrying at the deadline
//! only makes the rewrite unavailable, and the assessment is kept.
//! Language-model calls share a separate semaphore across every run of the
//! orchestrator. A unit's failure, timeout or panic is recorded in its own
//! slot and never affects its siblings.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use clausewise_ai::{
    EmbeddingService, LanguageModel, MatchOptions, RetryPolicy, RewriteGenerator, RuleMatcher,
};
use clausewise_core::{
    AnalysisConfig, Clause, ClauseOutcome, ComplianceReport, ConfigError, Contract, ContractId,
    CorpusVersion, RewriteOutcome, RiskAssessment, RuleCorpus, RunStatus, score, segment,
};
use clausewise_store::{CacheKey, MatchCache};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::assembler::ReportAssembler;
use crate::slots::ResultSlots;

static NEXT_RUN: AtomicU64 = AtomicU64::new(1);

// ── Run state ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Pending,
    Segmenting,
    Analyzing,
    Assembling,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Segmenting => "segmenting",
            Self::Analyzing => "analyzing",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyCompleted | Self::Failed)
    }

    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Segmenting)
                | (Segmenting, Analyzing | Failed)
                | (Analyzing, Assembling)
                | (Assembling, Completed | PartiallyCompleted | Failed)
        )
    }

    /// Terminal state for a report's status.
    pub fn finished(status: RunStatus) -> Self {
        match status {
            RunStatus::Complete => Self::Completed,
            RunStatus::Partial => Self::PartiallyCompleted,
            RunStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal run transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RunState,
    pub to: RunState,
}

/// Owns the state channel of one run and enforces legal transitions.
struct RunTracker {
    run: u64,
    state: watch::Sender<RunState>,
}

impl RunTracker {
    fn try_advance(&self, next: RunState) -> Result<(), TransitionError> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_advance_to(next) {
                *current = next;
                true
            } else {
                result = Err(TransitionError { from: *current, to: next });
                false
            }
        });
        result
    }

    fn advance(&self, next: RunState) {
        match self.try_advance(next) {
            Ok(()) => info!(run = self.run, state = next.as_str(), "run state changed"),
            Err(e) => error!(run = self.run, error = %e, "run state transition rejected"),
        }
    }
}

// ── Orchestrator ──

pub struct OrchestratorBuilder {
    config: AnalysisConfig,
    embeddings: Arc<dyn EmbeddingService>,
    language_model: Option<Arc<dyn LanguageModel>>,
    cache: Option<Arc<MatchCache>>,
}

impl OrchestratorBuilder {
    /// Without a language model every rewrite is recorded as disabled.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Share a match cache, e.g. between orchestrators with the same config.
    pub fn cache(mut self, cache: Arc<MatchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        self.config.validate()?;
        if self.config.rewrites_enabled && self.language_model.is_none() {
            warn!("rewrites enabled but no language model configured; rewrites are disabled");
        }
        let matcher = RuleMatcher::new(self.embeddings, MatchOptions::from_config(&self.config));
        let rewriter = self
            .language_model
            .map(|model| RewriteGenerator::new(model, RetryPolicy::from_config(&self.config)));
        Ok(Orchestrator {
            inner: Arc::new(Inner {
                rewrite_permits: Semaphore::new(self.config.max_concurrent_rewrites),
                cache: self.cache.unwrap_or_default(),
                matcher,
                rewriter,
                config: self.config,
            }),
        })
    }
}

struct Inner {
    config: AnalysisConfig,
    matcher: RuleMatcher,
    rewriter: Option<RewriteGenerator>,
    cache: Arc<MatchCache>,
    rewrite_permits: Semaphore,
}

/// Runs analyses. Cheap to clone; clones share the matcher, match cache and
/// rewrite limiter.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(
        config: AnalysisConfig,
        embeddings: Arc<dyn EmbeddingService>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            embeddings,
            language_model: None,
            cache: None,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<MatchCache> {
        &self.inner.cache
    }

    /// Drop cached matches and rule indexes of every other corpus version.
    pub fn retain_version(&self, version: &CorpusVersion) {
        self.inner.matcher.retain_version(version);
        self.inner.cache.retain_version(version);
    }

    /// Spawn an analysis of `contract` against the pinned `corpus`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, contract: Contract, corpus: Arc<RuleCorpus>) -> AnalysisRun {
        let run = NEXT_RUN.fetch_add(1, Ordering::Relaxed);
        let (state_tx, state_rx) = watch::channel(RunState::Pending);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let contract_id = contract.id().clone();
        let corpus_version = corpus.version().clone();

        let tracker = RunTracker { run, state: state_tx };
        let this = self.clone();
        let handle = tokio::spawn(async move { this.execute(tracker, contract, corpus, cancel_rx).await });

        AnalysisRun {
            run,
            contract_id,
            corpus_version,
            state: state_rx,
            cancel: cancel_tx,
            handle,
        }
    }

    /// Analyse `contract` and wait for the report.
    pub async fn run(&self, contract: Contract, corpus: Arc<RuleCorpus>) -> ComplianceReport {
        self.start(contract, corpus).finish().await
    }

    async fn execute(
        self,
        tracker: RunTracker,
        contract: Contract,
        corpus: Arc<RuleCorpus>,
        cancel: watch::Receiver<bool>,
    ) -> ComplianceReport {
        let run = tracker.run;
        let contract_id = contract.id().clone();
        let version = corpus.version().clone();
        info!(
            run,
            contract = %contract_id,
            corpus_version = %version,
            rules = corpus.len(),
            "analysis started"
        );

        tracker.advance(RunState::Segmenting);
        let prepared = segment(&contract).map_err(|e| e.to_string()).and_then(|clauses| {
            ReportAssembler::new(contract_id.clone(), version.clone(), clauses)
                .map_err(|e| e.to_string())
        });
        let assembler = match prepared {
            Ok(assembler) => assembler,
            Err(reason) => {
                warn!(run, contract = %contract_id, error = %reason, "segmentation failed");
                tracker.advance(RunState::Failed);
                return ComplianceReport::failed(contract_id, version, reason);
            }
        };
        info!(run, clauses = assembler.clauses().len(), "contract segmented");

        tracker.advance(RunState::Analyzing);
        let slots = Arc::new(ResultSlots::new(assembler.clauses().len()));
        self.analyze(run, assembler.clauses(), &corpus, &slots, cancel)
            .await;

        tracker.advance(RunState::Assembling);
        let assembled = match Arc::into_inner(slots) {
            Some(slots) => assembler.assemble(slots).map_err(|e| e.to_string()),
            None => Err("clause units outlived the run".to_string()),
        };
        let report = assembled.unwrap_or_else(|reason| {
            error!(run, error = %reason, "report assembly failed");
            ComplianceReport::failed(contract_id, version, reason)
        });

        tracker.advance(RunState::finished(report.run_status()));
        info!(
            run,
            report = %report.report_id(),
            status = report.run_status().as_str(),
            assessed = report.summary().assessed,
            failed = report.failures().len(),
            "analysis finished"
        );
        report
    }

    /// Fan the clauses out and wait until every started unit has finished.
    /// Every slot is filled on return, unless a unit task was lost.
    async fn analyze(
        &self,
        run: u64,
        clauses: &[Clause],
        corpus: &Arc<RuleCorpus>,
        slots: &Arc<ResultSlots>,
        cancel: watch::Receiver<bool>,
    ) {
        let permits = Arc::new(Semaphore::new(self.inner.config.max_concurrent_clauses));
        let mut units = JoinSet::new();

        for (index, clause) in clauses.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = cancelled(cancel.clone()) => None,
                permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                info!(run, skipped = clauses.len() - index, "run cancelled, skipping remaining clauses");
                for skipped in index..clauses.len() {
                    record(slots, skipped, ClauseOutcome::Cancelled);
                }
                break;
            };

            let unit = self.clone();
            let clause = clause.clone();
            let corpus = Arc::clone(corpus);
            let slots = Arc::clone(slots);
            let cancel = cancel.clone();
            units.spawn(async move {
                let _permit = permit;
                let outcome = if *cancel.borrow() {
                    ClauseOutcome::Cancelled
                } else {
                    unit.timed_unit(&clause, &corpus).await
                };
                record(&slots, index, outcome);
            });
        }

        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                error!(run, error = %e, "clause task lost");
            }
        }
    }

    async fn timed_unit(&self, clause: &Clause, corpus: &RuleCorpus) -> ClauseOutcome {
        let deadline = Instant::now() + self.inner.config.clause_timeout();
        let unit = AssertUnwindSafe(self.clause_unit(clause, corpus, deadline)).catch_unwind();
        match unit.await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let error = panic_message(panic.as_ref());
                warn!(clause = %clause.id(), error = %error, "clause unit panicked");
                ClauseOutcome::Aborted { error }
            }
        }
    }

    async fn clause_unit(
        &self,
        clause: &Clause,
        corpus: &RuleCorpus,
        deadline: Instant,
    ) -> ClauseOutcome {
        let assessment = match tokio::time::timeout_at(deadline, self.assess(clause, corpus)).await {
            Ok(Ok(assessment)) => assessment,
            Ok(Err(failed)) => return failed,
            Err(_) => {
                let after_ms = self.inner.config.clause_timeout_ms;
                warn!(clause = %clause.id(), after_ms, "clause unit timed out");
                return ClauseOutcome::TimedOut { after_ms };
            }
        };
        let rewrite = self.rewrite(clause, &assessment, corpus, deadline).await;
        ClauseOutcome::Assessed { assessment, rewrite }
    }

    /// Match and score one clause. `Err` carries the failed outcome.
    async fn assess(&self, clause: &Clause, corpus: &RuleCorpus) -> Result<RiskAssessment, ClauseOutcome> {
        let key = CacheKey::for_clause(clause, corpus.version());
        let matches = match self.inner.cache.get(&key) {
            Some(hit) => {
                trace!(clause = %clause.id(), "match cache hit");
                hit
            }
            None => match self.inner.matcher.match_clause(clause, corpus).await {
                Ok(found) => self.inner.cache.insert(key, found),
                Err(e) => {
                    warn!(clause = %clause.id(), error = %e, "rule matching failed");
                    return Err(ClauseOutcome::MatchingFailed {
                        error: e.to_string(),
                    });
                }
            },
        };

        let assessment = match score(clause.id(), &matches) {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(clause = %clause.id(), error = %e, "risk scoring failed");
                return Err(ClauseOutcome::ScoringFailed {
                    error: e.to_string(),
                });
            }
        };
        debug!(
            clause = %clause.id(),
            score = assessment.risk_score,
            category = assessment.risk_category.as_str(),
            "clause scored"
        );
        Ok(assessment)
    }

    /// Rewrite within what is left of the clause budget.
    async fn rewrite(
        &self,
        clause: &Clause,
        assessment: &RiskAssessment,
        corpus: &RuleCorpus,
        deadline: Instant,
    ) -> RewriteOutcome {
        let config = &self.inner.config;
        if assessment.risk_category < config.rewrite_min_category {
            return RewriteOutcome::NotRequired;
        }
        let Some(rewriter) = self
            .inner
            .rewriter
            .as_ref()
            .filter(|_| config.rewrites_enabled)
        else {
            return RewriteOutcome::Disabled;
        };

        let permit = tokio::time::timeout_at(deadline, self.inner.rewrite_permits.acquire()).await;
        let _permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return RewriteOutcome::Unavailable {
                    attempts: 0,
                    error: "rewrite limiter closed".to_string(),
                };
            }
            Err(_) => {
                warn!(clause = %clause.id(), "no rewrite slot before the clause deadline");
                return RewriteOutcome::Unavailable {
                    attempts: 0,
                    error: "no rewrite slot before the clause deadline".to_string(),
                };
            }
        };
        match rewriter.generate_by(clause, assessment, corpus, deadline).await {
            Ok(suggestion) => RewriteOutcome::Suggested { suggestion },
            Err(e) => {
                warn!(
                    clause = %clause.id(),
                    attempts = e.attempts(),
                    error = %e,
                    "rewrite unavailable"
                );
                RewriteOutcome::Unavailable {
                    attempts: e.attempts(),
                    error: e.to_string(),
                }
            }
        }
    }
}

fn record(slots: &ResultSlots, index: usize, outcome: ClauseOutcome) {
    if let Err(e) = slots.fill(index, outcome) {
        error!(error = %e, "clause outcome dropped");
    }
}

/// Resolves once cancellation is requested. If the run handle is dropped
/// without cancelling, never resolves.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match detail {
        Some(detail) => format!("clause unit panicked: {detail}"),
        None => "clause unit panicked".to_string(),
    }
}

// ── Run handle ──

/// Handle to a spawned analysis.
pub struct AnalysisRun {
    run: u64,
    contract_id: ContractId,
    corpus_version: CorpusVersion,
    state: watch::Receiver<RunState>,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<ComplianceReport>,
}

impl AnalysisRun {
    pub fn id(&self) -> u64 {
        self.run
    }

    pub fn contract_id(&self) -> &ContractId {
        &self.contract_id
    }

    pub fn corpus_version(&self) -> &CorpusVersion {
        &self.corpus_version
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Receiver that observes state changes, usable after `finish`.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Request cooperative cancellation. Clauses that have not started are
    /// recorded as cancelled; running ones finish or time out.
    pub fn cancel(&self) {
        if !self.cancel.send_replace(true) {
            info!(run = self.run, "cancellation requested");
        }
    }

    /// Wait for the report. Never fails: a run that dies outright yields a
    /// `failed` report.
    pub async fn finish(self) -> ComplianceReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(run = self.run, error = %e, "analysis task died");
                ComplianceReport::failed(
                    self.contract_id,
                    self.corpus_version,
                    format!("analysis task died: {e}"),
                )
            }
        }
    }
}
