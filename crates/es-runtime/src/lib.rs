#![forbid(unsafe_code)]

use es_types::ValueKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_DEPTH: usize = 64;
pub const DEFAULT_MAX_FORMULA_LEN: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("formula nesting exceeds the maximum depth of {limit}")]
    MaxDepthExceeded { limit: usize },
    #[error("formula is {len} bytes long; the limit is {limit}")]
    FormulaTooLong { len: usize, limit: usize },
}

/// Bounds applied to every evaluation. Nesting depth counts function calls:
/// `MA(GDP,3)` has depth 1, `ROC(MA(GDP,3),2)` depth 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalPolicy {
    pub max_depth: usize,
    pub max_formula_len: usize,
}

impl EvalPolicy {
    #[must_use]
    pub fn standard() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_formula_len: DEFAULT_MAX_FORMULA_LEN,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_max_formula_len(mut self, max_formula_len: usize) -> Self {
        self.max_formula_len = max_formula_len;
        self
    }

    pub fn admit_formula(&self, formula: &str) -> Result<(), PolicyViolation> {
        if formula.len() > self.max_formula_len {
            return Err(PolicyViolation::FormulaTooLong {
                len: formula.len(),
                limit: self.max_formula_len,
            });
        }
        Ok(())
    }

    pub fn admit_depth(&self, depth: usize) -> Result<(), PolicyViolation> {
        if depth > self.max_depth {
            return Err(PolicyViolation::MaxDepthExceeded {
                limit: self.max_depth,
            });
        }
        Ok(())
    }
}

impl Default for EvalPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallOutcome {
    Scalar { value: f64 },
    Series { len: usize },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub depth: usize,
    pub function: String,
    pub argument_kinds: Vec<ValueKind>,
    pub outcome: CallOutcome,
}

impl CallRecord {
    #[must_use]
    pub fn render_plain(&self) -> String {
        let args = self
            .argument_kinds
            .iter()
            .map(ValueKind::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let outcome = match &self.outcome {
            CallOutcome::Scalar { value } => format!("scalar {value}"),
            CallOutcome::Series { len } => format!("series[{len}]"),
            CallOutcome::Failed { message } => format!("error: {message}"),
        };
        format!(
            "{:indent$}{}({args}) -> {outcome}",
            "",
            self.function,
            indent = self.depth.saturating_sub(1) * 2
        )
    }
}

/// Function invocations made while evaluating a formula, innermost calls
/// first (arguments finish before the call that consumes them).
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLedger {
    records: Vec<CallRecord>,
}

impl CallLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: CallRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[must_use]
    pub fn render_plain(&self) -> String {
        self.records
            .iter()
            .map(CallRecord::render_plain)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
