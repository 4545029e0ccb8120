//! Write-once result collection, one slot per clause.
//!
//! Slot `i` belongs to the clause at position `i` in ordinal order. Each slot
//! accepts exactly one outcome; workers fill disjoint slots without taking a
//! lock, and a second write to the same slot is rejected.

use std::sync::OnceLock;

use clausewise_core::ClauseOutcome;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("slot {index} is out of range for {len} clauses")]
    OutOfRange { index: usize, len: usize },

    #[error("slot {0} already holds an outcome")]
    AlreadyFilled(usize),
}

#[derive(Debug)]
pub struct ResultSlots {
    slots: Box<[OnceLock<ClauseOutcome>]>,
}

impl ResultSlots {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn fill(&self, index: usize, outcome: ClauseOutcome) -> Result<(), SlotError> {
        let slot = self.slots.get(index).ok_or(SlotError::OutOfRange {
            index,
            len: self.slots.len(),
        })?;
        slot.set(outcome).map_err(|_| SlotError::AlreadyFilled(index))
    }

    pub fn get(&self, index: usize) -> Option<&ClauseOutcome> {
        self.slots.get(index).and_then(OnceLock::get)
    }

    /// Number of slots holding an outcome.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    /// Take the outcomes out, in slot order. Unfilled slots yield `None`.
    pub fn into_outcomes(self) -> Vec<Option<ClauseOutcome>> {
        self.slots
            .into_vec()
            .into_iter()
            .map(OnceLock::into_inner)
            .collect()
    }
}
