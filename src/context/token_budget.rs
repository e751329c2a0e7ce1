//! Token budget ledger for a single packing call
//!
//! The ledger only ever charges a cost that fits, so `used <= budget` holds
//! by construction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token budget errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("Budget must be positive, got {0}")]
    InvalidBudget(usize),

    #[error("Insufficient budget: need {requested} tokens, have {remaining} tokens")]
    Exceeded { requested: usize, remaining: usize },
}

/// Running account of a token budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    budget: usize,
    used: usize,
}

impl TokenBudget {
    /// Create a ledger; a zero budget is a configuration error
    pub fn new(budget: usize) -> Result<Self, BudgetError> {
        if budget == 0 {
            return Err(BudgetError::InvalidBudget(budget));
        }
        Ok(Self { budget, used: 0 })
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.budget - self.used
    }

    pub fn fits(&self, cost: usize) -> bool {
        cost <= self.remaining()
    }

    /// Deduct `cost` if it fits, leaving the ledger untouched otherwise
    pub fn charge(&mut self, cost: usize) -> Result<(), BudgetError> {
        if !self.fits(cost) {
            return Err(BudgetError::Exceeded {
                requested: cost,
                remaining: self.remaining(),
            });
        }
        self.used += cost;
        Ok(())
    }

    /// Boolean form of [`charge`](Self::charge)
    pub fn try_charge(&mut self, cost: usize) -> bool {
        self.charge(cost).is_ok()
    }
}
