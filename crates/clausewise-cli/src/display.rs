//! Vertical card display for compliance reports, clause lists and corpora.

use std::io::{self, Write};

use clausewise_core::{
    Clause, ClauseOutcome, ClauseReport, ComplianceReport, RewriteOutcome, RuleCorpus,
};

const MAX_EXCERPT: usize = 72;
const MAX_MATCHES: usize = 5;

// ── Public API ──

pub fn print_report_card(report: &ComplianceReport) -> io::Result<()> {
    write_report_card(&mut io::stdout().lock(), report)
}

pub fn print_clauses(clauses: &[Clause]) -> io::Result<()> {
    write_clauses(&mut io::stdout().lock(), clauses)
}

pub fn print_corpus(corpus: &RuleCorpus) -> io::Result<()> {
    write_corpus(&mut io::stdout().lock(), corpus)
}

/// A report as a card: header, summary figures, per-clause results, failures.
pub fn write_report_card(out: &mut impl Write, report: &ComplianceReport) -> io::Result<()> {
    writeln!(out, "=== {} ===", report.contract_id())?;
    writeln!(
        out,
        "Compliance report {} ({})",
        report.report_id(),
        report.run_status()
    )?;
    writeln!(out)?;

    writeln!(out, "Run")?;
    row(out, "corpus_version", report.corpus_version())?;
    row(
        out,
        "generated_at",
        report.generated_at().format("%Y-%m-%d %H:%M:%S UTC"),
    )?;
    row(out, "status", report.run_status())?;
    if let Some(reason) = report.fatal_error() {
        row(out, "fatal_error", reason)?;
    }
    writeln!(out)?;

    let s = report.summary();
    writeln!(out, "Summary")?;
    row(out, "clauses", s.total_clauses)?;
    row(out, "assessed", s.assessed)?;
    row(out, "high / medium / low", format!("{} / {} / {}", s.high, s.medium, s.low))?;
    row(out, "failed", s.failed)?;
    if s.assessed > 0 {
        row(out, "compliance_rate", format!("{:.1}%", s.compliance_rate))?;
        row(out, "average_risk", format!("{:.2}", s.average_risk))?;
    }
    row(out, "verdict", s.verdict.as_str())?;
    row(out, "rewrites_suggested", s.rewrites_suggested)?;
    if s.rewrites_unavailable > 0 {
        row(out, "rewrites_unavailable", s.rewrites_unavailable)?;
    }
    writeln!(out)?;

    if !s.flagged_regulations.is_empty() {
        writeln!(out, "Flagged Regulations")?;
        for (regulation, count) in &s.flagged_regulations {
            row(out, regulation, count)?;
        }
        writeln!(out)?;
    }

    if !report.results().is_empty() {
        writeln!(out, "Clauses")?;
        for result in report.results() {
            write_clause_result(out, result)?;
        }
        writeln!(out)?;
    }

    if !report.failures().is_empty() {
        writeln!(out, "Failures ({})", report.failures().len())?;
        for f in report.failures() {
            writeln!(
                out,
                "  [{}] {:<20} {}",
                f.ordinal,
                f.kind.as_str(),
                excerpt(&f.message, MAX_EXCERPT)
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Clauses as produced by segmentation, one line each.
pub fn write_clauses(out: &mut impl Write, clauses: &[Clause]) -> io::Result<()> {
    writeln!(out, "=== {} clauses ===", clauses.len())?;
    for clause in clauses {
        let span = clause.span();
        writeln!(
            out,
            "  [{}] {:<12} {:>6}..{:<6} {}",
            clause.ordinal(),
            clause.heading().unwrap_or("-"),
            span.start,
            span.end,
            excerpt(clause.text(), MAX_EXCERPT)
        )?;
    }
    Ok(())
}

pub fn write_corpus(out: &mut impl Write, corpus: &RuleCorpus) -> io::Result<()> {
    writeln!(out, "=== Corpus {} ({} rules) ===", corpus.version(), corpus.len())?;
    for rule in corpus.rules() {
        writeln!(
            out,
            "  {:<16} {:<8} {:<6} {:<20} sev {}",
            rule.id.as_str(),
            rule.regulation,
            rule.jurisdiction,
            rule.category,
            rule.severity
        )?;
        writeln!(out, "      {}", excerpt(&rule.description, MAX_EXCERPT))?;
    }
    Ok(())
}

// ── Clause rendering ──

fn write_clause_result(out: &mut impl Write, result: &ClauseReport) -> io::Result<()> {
    let clause = &result.clause;
    let heading = clause.heading().unwrap_or("-");
    match &result.outcome {
        ClauseOutcome::Assessed { assessment, rewrite } => {
            writeln!(
                out,
                "  [{}] {:<8} {:<6} {:.2}  {}",
                clause.ordinal(),
                heading,
                assessment.risk_category.as_str().to_uppercase(),
                assessment.risk_score,
                excerpt(clause.text(), MAX_EXCERPT)
            )?;
            let matches = &assessment.contributing_matches;
            for m in matches.iter().take(MAX_MATCHES) {
                writeln!(
                    out,
                    "      {:<16} {:<8} sev {}  conf {:.2}",
                    m.rule_id.as_str(),
                    m.regulation,
                    m.severity,
                    m.confidence
                )?;
            }
            if matches.len() > MAX_MATCHES {
                writeln!(out, "      ... and {} more", matches.len() - MAX_MATCHES)?;
            }
            match rewrite {
                RewriteOutcome::Suggested { suggestion } => {
                    writeln!(
                        out,
                        "      suggestion: {}",
                        excerpt(&suggestion.suggested_text, MAX_EXCERPT)
                    )?;
                }
                RewriteOutcome::Unavailable { attempts, .. } => {
                    writeln!(out, "      suggestion unavailable after {attempts} attempts")?;
                }
                RewriteOutcome::NotRequired | RewriteOutcome::Disabled => {}
            }
        }
        other => {
            writeln!(
                out,
                "  [{}] {:<8} {:<6}       {}",
                clause.ordinal(),
                heading,
                outcome_label(other),
                excerpt(clause.text(), MAX_EXCERPT)
            )?;
        }
    }
    Ok(())
}

fn outcome_label(outcome: &ClauseOutcome) -> &'static str {
    match outcome {
        ClauseOutcome::Assessed { .. } => "OK",
        ClauseOutcome::MatchingFailed { .. } | ClauseOutcome::ScoringFailed { .. } => "FAILED",
        ClauseOutcome::TimedOut { .. } => "TIMEOUT",
        ClauseOutcome::Cancelled => "SKIPPED",
        ClauseOutcome::Aborted { .. } => "ABORTED",
    }
}

// ── Helpers ──

fn row(out: &mut impl Write, label: &str, value: impl std::fmt::Display) -> io::Result<()> {
    writeln!(out, "  {label:<26} {value}")
}

/// First line-folded `max` characters of `text`.
fn excerpt(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
