//! Rewrite suggestions for risky clauses.
//!
//! The generator only sees clause text and the rules it conflicts with. It
//! returns a suggestion; the contract itself is never modified.

use std::sync::Arc;
use std::time::Duration;

use clausewise_core::{
    AnalysisConfig, Clause, RewriteSuggestion, RiskAssessment, RuleCorpus, RuleId,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::service::{GenerateRequest, LanguageModel, ServiceError};

/// Upper bound on a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_TOKENS: u32 = 1024;

// ── Prompt templates ──

const SYSTEM_PROMPT: &str = "\
You are a contract compliance reviewer.

Given a contract clause and the regulatory requirements it conflicts with, draft a replacement \
clause that satisfies every listed requirement while keeping the commercial intent of the \
original. Keep the drafting style and defined terms of the source clause.

Respond ONLY with a JSON object. No markdown fences, no explanation, just raw JSON:
{
  \"suggested_text\": \"the full replacement clause\",
  \"rationale\": \"one or two sentences on how the new text addresses each requirement\"
}";

fn build_user_prompt(clause_text: &str, violated: &[ViolatedRule]) -> String {
    let requirements: String = violated
        .iter()
        .map(|r| {
            format!(
                "- [{regulation}] {id} (severity {severity}/5): {description}\n",
                regulation = r.regulation,
                id = r.id,
                severity = r.severity,
                description = r.description,
            )
        })
        .collect();
    format!(
        "Requirements the clause conflicts with:\n\
         {requirements}\
         \n\
         Clause text:\n\
         {clause_text}"
    )
}

// ── Types ──

/// A rule the clause was found to conflict with, as presented to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolatedRule {
    pub id: RuleId,
    pub regulation: String,
    pub severity: u8,
    pub description: String,
}

impl ViolatedRule {
    /// Rules behind an assessment's matches, most severe first. Falls back to
    /// the match itself when the rule is missing from `corpus`.
    pub fn from_assessment(assessment: &RiskAssessment, corpus: &RuleCorpus) -> Vec<Self> {
        assessment
            .contributing_matches
            .iter()
            .map(|m| match corpus.get(&m.rule_id) {
                Some(rule) => Self {
                    id: rule.id.clone(),
                    regulation: rule.regulation.clone(),
                    severity: rule.severity,
                    description: rule.description.clone(),
                },
                None => Self {
                    id: m.rule_id.clone(),
                    regulation: m.regulation.clone(),
                    severity: m.severity,
                    description: String::new(),
                },
            })
            .collect()
    }
}

/// Model output for one clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub suggested_text: String,
    pub rationale: String,
    /// Model that produced the draft.
    pub model: String,
}

#[derive(Deserialize)]
struct RewriteReply {
    suggested_text: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RewriteError {
    #[error("language model failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: ServiceError,
    },

    #[error("language model rejected the request: {source}")]
    Permanent { attempts: u32, source: ServiceError },
}

impl RewriteError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Permanent { attempts, .. } => *attempts,
        }
    }
}

/// Retries after the first attempt, with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_retries: config.rewrite_max_retries,
            backoff: config.rewrite_backoff(),
        }
    }

    /// Delay before retry number `retry` (1-based). A rate-limit hint from
    /// the service wins over the computed backoff. Both are capped at
    /// [`MAX_BACKOFF`].
    pub fn delay(&self, retry: u32, error: &ServiceError) -> Duration {
        if let ServiceError::RateLimited {
            retry_after: Some(after),
        } = error
        {
            return (*after).min(MAX_BACKOFF);
        }
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

// ── Generator ──

pub struct RewriteGenerator {
    model: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
}

impl RewriteGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, policy: RetryPolicy) -> Self {
        Self { model, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Suggest a compliant replacement for `clause`.
    pub async fn generate(
        &self,
        clause: &Clause,
        assessment: &RiskAssessment,
        corpus: &RuleCorpus,
    ) -> Result<RewriteSuggestion, RewriteError> {
        self.suggest(clause, assessment, corpus, None).await
    }

    /// Like [`generate`](Self::generate), but gives up at `deadline`: a model
    /// call still running then, or a retry that could not start before it,
    /// ends the attempts with [`RewriteError::Exhausted`].
    pub async fn generate_by(
        &self,
        clause: &Clause,
        assessment: &RiskAssessment,
        corpus: &RuleCorpus,
        deadline: Instant,
    ) -> Result<RewriteSuggestion, RewriteError> {
        self.suggest(clause, assessment, corpus, Some(deadline)).await
    }

    async fn suggest(
        &self,
        clause: &Clause,
        assessment: &RiskAssessment,
        corpus: &RuleCorpus,
        deadline: Option<Instant>,
    ) -> Result<RewriteSuggestion, RewriteError> {
        let violated = ViolatedRule::from_assessment(assessment, corpus);
        let draft = self.attempt(clause.text(), &violated, deadline).await?;
        debug!(clause = %clause.id(), model = %draft.model, "rewrite drafted");
        Ok(RewriteSuggestion {
            clause_id: clause.id().clone(),
            suggested_text: draft.suggested_text,
            rationale: draft.rationale,
            model_version: draft.model,
            addressed_rules: violated.into_iter().map(|r| r.id).collect(),
        })
    }

    /// Ask the model for replacement text, retrying transient failures.
    pub async fn draft(
        &self,
        clause_text: &str,
        violated: &[ViolatedRule],
    ) -> Result<Draft, RewriteError> {
        self.attempt(clause_text, violated, None).await
    }

    pub async fn draft_by(
        &self,
        clause_text: &str,
        violated: &[ViolatedRule],
        deadline: Instant,
    ) -> Result<Draft, RewriteError> {
        self.attempt(clause_text, violated, Some(deadline)).await
    }

    async fn attempt(
        &self,
        clause_text: &str,
        violated: &[ViolatedRule],
        deadline: Option<Instant>,
    ) -> Result<Draft, RewriteError> {
        let started = Instant::now();
        let request = GenerateRequest {
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            user_prompt: build_user_prompt(clause_text, violated),
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let call = self.model.generate(&request);
            let reply = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                    Ok(reply) => reply,
                    Err(_) => {
                        let last = ServiceError::Timeout(started.elapsed());
                        return Err(RewriteError::Exhausted { attempts, last });
                    }
                },
                None => call.await,
            };
            let result = match reply {
                Ok(generation) => parse_reply(&generation.text).map(|reply| Draft {
                    suggested_text: reply.suggested_text.trim().to_string(),
                    rationale: reply.rationale.trim().to_string(),
                    model: generation.model,
                }),
                Err(e) => Err(e),
            };

            match result {
                Ok(draft) => return Ok(draft),
                Err(e) if !e.is_transient() => {
                    return Err(RewriteError::Permanent {
                        attempts,
                        source: e,
                    });
                }
                Err(e) if attempts > self.policy.max_retries => {
                    return Err(RewriteError::Exhausted { attempts, last: e });
                }
                Err(e) => {
                    let delay = self.policy.delay(attempts, &e);
                    if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                        warn!(attempt = attempts, ?delay, error = %e, "no time left to retry rewrite");
                        return Err(RewriteError::Exhausted { attempts, last: e });
                    }
                    warn!(attempt = attempts, ?delay, error = %e, "rewrite attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Extract the JSON object from a model response. Tolerates code fences
/// and surrounding prose.
fn parse_reply(text: &str) -> Result<RewriteReply, ServiceError> {
    let json = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(ServiceError::InvalidResponse(format!(
                "no JSON object in response: {}",
                preview(text)
            )));
        }
    };
    let reply: RewriteReply = serde_json::from_str(json).map_err(|e| {
        ServiceError::InvalidResponse(format!("{e}; raw: {}", preview(text)))
    })?;
    if reply.suggested_text.trim().is_empty() {
        return Err(ServiceError::InvalidResponse(
            "suggested_text is empty".into(),
        ));
    }
    Ok(reply)
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use clausewise_core::{
        ClauseMatch, Contract, ContractId, CorpusVersion, RegulatoryRule, RiskCategory, TextSpan,
    };

    use crate::service::Generation;

    /// Replays canned responses and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Result<Generation, ServiceError>>>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Generation, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ServiceError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::Unavailable("script exhausted".into())))
        }
    }

    fn ok(text: &str) -> Result<Generation, ServiceError> {
        Ok(Generation {
            text: text.into(),
            model: "test-model-1".into(),
        })
    }

    const GOOD: &str = r#"{"suggested_text": "Personal data is deleted within 30 days of termination.", "rationale": "Limits retention."}"#;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    fn fixture() -> (Clause, RiskAssessment, RuleCorpus) {
        let text = "Supplier may retain personal data indefinitely.";
        let contract = Contract::ingest(ContractId::new("msa"), text);
        let clause = Clause::from_span(&contract, 3, TextSpan::new(0, text.len()), None);
        let rule = RegulatoryRule {
            id: RuleId::new("GDPR-5-1-e"),
            regulation: "GDPR".into(),
            jurisdiction: "EU".into(),
            category: "data_protection".into(),
            severity: 4,
            description: "Personal data must be kept no longer than necessary".into(),
            keywords: vec!["retention".into()],
            effective_from: None,
            effective_to: None,
        };
        let corpus = RuleCorpus::new(CorpusVersion::new("2025.1"), vec![rule]).unwrap();
        let assessment = RiskAssessment {
            clause_id: clause.id().clone(),
            risk_score: 0.7,
            risk_category: RiskCategory::High,
            contributing_matches: vec![ClauseMatch {
                rule_id: RuleId::new("GDPR-5-1-e"),
                regulation: "GDPR".into(),
                severity: 4,
                confidence: 0.9,
                matched_span: None,
            }],
        };
        (clause, assessment, corpus)
    }

    #[tokio::test]
    async fn suggestion_carries_model_and_rules() {
        let llm = Scripted::new(vec![ok(GOOD)]);
        let generator = RewriteGenerator::new(llm.clone(), policy(2));
        let (clause, assessment, corpus) = fixture();

        let s = generator.generate(&clause, &assessment, &corpus).await.unwrap();
        assert_eq!(s.clause_id, *clause.id());
        assert_eq!(
            s.suggested_text,
            "Personal data is deleted within 30 days of termination."
        );
        assert_eq!(s.rationale, "Limits retention.");
        assert_eq!(s.model_version, "test-model-1");
        assert_eq!(s.addressed_rules, vec![RuleId::new("GDPR-5-1-e")]);

        let requests = llm.requests.lock().unwrap();
        let prompt = &requests[0].user_prompt;
        assert!(prompt.contains("Supplier may retain personal data indefinitely."));
        assert!(prompt.contains("[GDPR] GDPR-5-1-e (severity 4/5)"));
        assert!(prompt.contains("kept no longer than necessary"));
        assert_eq!(requests[0].temperature, 0.0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let llm = Scripted::new(vec![
            Err(ServiceError::Timeout(Duration::from_secs(60))),
            Err(ServiceError::RateLimited {
                retry_after: Some(Duration::from_millis(2)),
            }),
            ok(GOOD),
        ]);
        let generator = RewriteGenerator::new(llm.clone(), policy(2));
        let draft = generator.draft("clause", &[]).await.unwrap();
        assert_eq!(draft.model, "test-model-1");
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_last_error() {
        let llm = Scripted::new(vec![
            Err(ServiceError::Unavailable("503".into())),
            Err(ServiceError::Unavailable("503".into())),
            Err(ServiceError::Unavailable("502".into())),
            ok(GOOD),
        ]);
        let generator = RewriteGenerator::new(llm.clone(), policy(2));
        let err = generator.draft("clause", &[]).await.unwrap_err();
        assert_eq!(
            err,
            RewriteError::Exhausted {
                attempts: 3,
                last: ServiceError::Unavailable("502".into())
            }
        );
        assert_eq!(err.attempts(), 3);
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let llm = Scripted::new(vec![Err(ServiceError::Rejected("401".into())), ok(GOOD)]);
        let generator = RewriteGenerator::new(llm.clone(), policy(5));
        let err = generator.draft("clause", &[]).await.unwrap_err();
        assert!(matches!(err, RewriteError::Permanent { attempts: 1, .. }));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn unparseable_reply_counts_as_transient() {
        let llm = Scripted::new(vec![ok("I cannot help with that."), ok(GOOD)]);
        let generator = RewriteGenerator::new(llm.clone(), policy(1));
        assert!(generator.draft("clause", &[]).await.is_ok());
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let llm = Scripted::new(vec![ok("{}"), ok(GOOD)]);
        let generator = RewriteGenerator::new(llm.clone(), policy(0));
        let err = generator.draft("clause", &[]).await.unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert!(matches!(
            err,
            RewriteError::Exhausted {
                last: ServiceError::InvalidResponse(_),
                ..
            }
        ));
    }

    /// Never answers.
    struct Hanging;

    #[async_trait]
    impl LanguageModel for Hanging {
        async fn generate(&self, _request: &GenerateRequest) -> Result<Generation, ServiceError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn hanging_model_gives_up_at_deadline() {
        let generator = RewriteGenerator::new(Arc::new(Hanging), policy(3));
        let deadline = Instant::now() + Duration::from_millis(50);
        let err = generator.draft_by("clause", &[], deadline).await.unwrap_err();
        assert!(matches!(
            err,
            RewriteError::Exhausted {
                attempts: 1,
                last: ServiceError::Timeout(_)
            }
        ));
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test]
    async fn retry_past_deadline_is_not_attempted() {
        let llm = Scripted::new(vec![
            Err(ServiceError::RateLimited {
                retry_after: Some(Duration::from_secs(20)),
            }),
            ok(GOOD),
        ]);
        let generator = RewriteGenerator::new(llm.clone(), policy(2));
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = generator.draft_by("clause", &[], deadline).await.unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert_eq!(llm.calls(), 1);
        assert!(Instant::now() < deadline);
    }

    #[tokio::test]
    async fn generous_deadline_behaves_like_generate() {
        let llm = Scripted::new(vec![Err(ServiceError::Unavailable("503".into())), ok(GOOD)]);
        let generator = RewriteGenerator::new(llm.clone(), policy(2));
        let (clause, assessment, corpus) = fixture();
        let deadline = Instant::now() + Duration::from_secs(30);
        let s = generator
            .generate_by(&clause, &assessment, &corpus, deadline)
            .await
            .unwrap();
        assert_eq!(s.model_version, "test-model-1");
        assert_eq!(llm.calls(), 2);
    }

    #[test]
    fn parse_tolerates_fences_and_prose() {
        let fenced = format!("Here you go:\n```json\n{GOOD}\n```");
        let reply = parse_reply(&fenced).unwrap();
        assert!(reply.suggested_text.starts_with("Personal data"));

        let no_rationale = parse_reply(r#"{"suggested_text": "x"}"#).unwrap();
        assert_eq!(no_rationale.rationale, "");
    }

    #[test]
    fn parse_rejects_missing_or_empty_text() {
        assert!(parse_reply("no json here").is_err());
        assert!(parse_reply(r#"{"rationale": "r"}"#).is_err());
        assert!(parse_reply(r#"{"suggested_text": "  "}"#).is_err());
    }

    #[test]
    fn backoff_doubles_and_honours_hints() {
        let p = RetryPolicy {
            max_retries: 5,
            backoff: Duration::from_millis(500),
        };
        let e = ServiceError::Unavailable("x".into());
        assert_eq!(p.delay(1, &e), Duration::from_millis(500));
        assert_eq!(p.delay(2, &e), Duration::from_millis(1000));
        assert_eq!(p.delay(3, &e), Duration::from_millis(2000));
        assert_eq!(p.delay(20, &e), MAX_BACKOFF);

        let limited = ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(p.delay(1, &limited), Duration::from_secs(7));
        let long_hint = ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(p.delay(1, &long_hint), MAX_BACKOFF);
        let unhinted = ServiceError::RateLimited { retry_after: None };
        assert_eq!(p.delay(2, &unhinted), Duration::from_millis(1000));
    }

    #[test]
    fn policy_reads_config() {
        let p = RetryPolicy::from_config(&AnalysisConfig::default());
        assert_eq!(p.max_retries, 2);
        assert_eq!(p.backoff, Duration::from_millis(500));
    }
}
