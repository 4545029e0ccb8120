//! Turns filled result slots into a [`ComplianceReport`].

use clausewise_core::{
    Clause, ClauseOutcome, ClauseReport, ComplianceReport, ContractId, CorpusVersion,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::slots::ResultSlots;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("clause {clause} belongs to contract {found}, not {expected}")]
    ForeignClause {
        clause: String,
        expected: String,
        found: String,
    },

    #[error("clause ordinal {0} appears more than once")]
    DuplicateOrdinal(usize),

    #[error("{slots} result slots for {clauses} clauses")]
    SlotCountMismatch { slots: usize, clauses: usize },
}

/// Holds what a report needs besides the outcomes: the contract, the pinned
/// corpus version and the clause list in ordinal order.
#[derive(Debug)]
pub struct ReportAssembler {
    contract_id: ContractId,
    corpus_version: CorpusVersion,
    clauses: Vec<Clause>,
}

impl ReportAssembler {
    /// Sorts `clauses` by ordinal. Rejects clauses from another contract and
    /// repeated ordinals.
    pub fn new(
        contract_id: ContractId,
        corpus_version: CorpusVersion,
        mut clauses: Vec<Clause>,
    ) -> Result<Self, AssemblyError> {
        if let Some(foreign) = clauses.iter().find(|c| c.contract_id() != &contract_id) {
            return Err(AssemblyError::ForeignClause {
                clause: foreign.id().to_string(),
                expected: contract_id.to_string(),
                found: foreign.contract_id().to_string(),
            });
        }
        clauses.sort_by_key(Clause::ordinal);
        if let Some(pair) = clauses.windows(2).find(|w| w[0].ordinal() == w[1].ordinal()) {
            return Err(AssemblyError::DuplicateOrdinal(pair[0].ordinal()));
        }
        Ok(Self {
            contract_id,
            corpus_version,
            clauses,
        })
    }

    pub fn contract_id(&self) -> &ContractId {
        &self.contract_id
    }

    pub fn corpus_version(&self) -> &CorpusVersion {
        &self.corpus_version
    }

    /// Clauses in ordinal order; slot `i` belongs to `clauses()[i]`.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Consume the assembler and the slots. A slot left empty means its unit
    /// never reported back and is recorded as aborted.
    pub fn assemble(self, slots: ResultSlots) -> Result<ComplianceReport, AssemblyError> {
        if slots.len() != self.clauses.len() {
            return Err(AssemblyError::SlotCountMismatch {
                slots: slots.len(),
                clauses: self.clauses.len(),
            });
        }

        let results: Vec<ClauseReport> = self
            .clauses
            .into_iter()
            .zip(slots.into_outcomes())
            .map(|(clause, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    warn!(clause = %clause.id(), "no outcome recorded for clause");
                    ClauseOutcome::Aborted {
                        error: "no outcome recorded".to_string(),
                    }
                });
                ClauseReport { clause, outcome }
            })
            .collect();

        let report = ComplianceReport::from_results(self.contract_id, self.corpus_version, results);
        debug!(
            report = %report.report_id(),
            status = report.run_status().as_str(),
            failures = report.failures().len(),
            "report assembled"
        );
        Ok(report)
    }
}
