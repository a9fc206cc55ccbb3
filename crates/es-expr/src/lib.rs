#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::LazyLock;

use es_frame::Series;
use es_runtime::{CallLedger, CallOutcome, CallRecord, EvalPolicy, PolicyViolation};
use es_types::{ValueKind, parse_numeric_literal};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Call { name: String, args: Vec<Expr> },
    Identifier { name: String },
    Literal { value: f64 },
}

impl Expr {
    /// Nesting depth in function calls; identifiers and literals are 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Call { args, .. } => 1 + args.iter().map(Self::depth).max().unwrap_or(0),
            Self::Identifier { .. } | Self::Literal { .. } => 0,
        }
    }

    /// Identifiers referenced anywhere in the tree, lowercased as they are
    /// looked up, without duplicates.
    #[must_use]
    pub fn referenced_series(&self) -> Vec<String> {
        let mut out = std::collections::BTreeSet::new();
        self.collect_series(&mut out);
        out.into_iter().collect()
    }

    fn collect_series(&self, out: &mut std::collections::BTreeSet<String>) {
        match self {
            Self::Call { args, .. } => args.iter().for_each(|arg| arg.collect_series(out)),
            Self::Identifier { name } => {
                out.insert(name.to_ascii_lowercase());
            }
            Self::Literal { .. } => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call { name, args } => {
                write!(f, "{name}(")?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::Identifier { name } => f.write_str(name),
            Self::Literal { value } => write!(f, "{value}"),
        }
    }
}

/// Result of evaluating any expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Series(Series),
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Scalar(_) => ValueKind::Scalar,
            Self::Series(_) => ValueKind::Series,
        }
    }

    #[must_use]
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            Self::Series(_) => None,
        }
    }

    #[must_use]
    pub fn as_series(&self) -> Option<&Series> {
        match self {
            Self::Series(series) => Some(series),
            Self::Scalar(_) => None,
        }
    }

    #[must_use]
    pub fn into_series(self) -> Option<Series> {
        match self {
            Self::Series(series) => Some(series),
            Self::Scalar(_) => None,
        }
    }
}

/// Scalars serialize as a bare number and series as an array of
/// `[date, value]` pairs, the shape chart consumers read.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(value) => serializer.serialize_f64(*value),
            Self::Series(series) => serializer.collect_seq(series.to_observations()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    #[error("formula is empty")]
    EmptyFormula,
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("unknown series identifier: {0}")]
    UnknownIdentifier(String),
    #[error("invalid expression: '{0}'")]
    InvalidExpression(String),
    #[error("{function} expects {expected} parameter(s), got {got}")]
    WrongArity {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("{function}: periods must be a positive integer, got {value}")]
    InvalidPeriods { function: String, value: f64 },
    #[error("{function}: argument {position} must be a {expected}, got a {found}")]
    WrongArgumentKind {
        function: String,
        position: usize,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("formula nesting exceeds the maximum depth of {limit}")]
    MaxDepthExceeded { limit: usize },
    #[error("formula is {len} bytes long; the limit is {limit}")]
    FormulaTooLong { len: usize, limit: usize },
}

impl FormulaError {
    /// Stable snake_case name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyFormula => "empty_formula",
            Self::UnknownFunction(_) => "unknown_function",
            Self::UnknownIdentifier(_) => "unknown_identifier",
            Self::InvalidExpression(_) => "invalid_expression",
            Self::WrongArity { .. } => "wrong_arity",
            Self::InvalidPeriods { .. } => "invalid_periods",
            Self::WrongArgumentKind { .. } => "wrong_argument_kind",
            Self::MaxDepthExceeded { .. } => "max_depth_exceeded",
            Self::FormulaTooLong { .. } => "formula_too_long",
        }
    }
}

impl From<PolicyViolation> for FormulaError {
    fn from(violation: PolicyViolation) -> Self {
        match violation {
            PolicyViolation::MaxDepthExceeded { limit } => Self::MaxDepthExceeded { limit },
            PolicyViolation::FormulaTooLong { len, limit } => Self::FormulaTooLong { len, limit },
        }
    }
}

// ── Series lookup ───────────────────────────────────────────────────────

/// Read-only source of series for identifiers. Keys are lowercase; the
/// evaluator lowercases identifiers before calling [`SeriesStore::lookup`].
pub trait SeriesStore {
    fn lookup(&self, id: &str) -> Option<&Series>;
}

impl<T: SeriesStore + ?Sized> SeriesStore for &T {
    fn lookup(&self, id: &str) -> Option<&Series> {
        (**self).lookup(id)
    }
}

impl SeriesStore for BTreeMap<String, Series> {
    fn lookup(&self, id: &str) -> Option<&Series> {
        self.get(id)
    }
}

impl<S: BuildHasher> SeriesStore for HashMap<String, Series, S> {
    fn lookup(&self, id: &str) -> Option<&Series> {
        self.get(id)
    }
}

/// Per-call data context: lowercase series id to series.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    series: BTreeMap<String, Series>,
}

impl EvalContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            series: BTreeMap::new(),
        }
    }

    /// Register a series under its own name, lowercased.
    pub fn insert_series(&mut self, series: Series) {
        let id = series.name().to_ascii_lowercase();
        self.series.insert(id, series);
    }

    /// Register a series under `id`, lowercased.
    pub fn insert(&mut self, id: &str, series: Series) {
        self.series.insert(id.to_ascii_lowercase(), series);
    }

    #[must_use]
    pub fn get_series(&self, id: &str) -> Option<&Series> {
        self.series.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.series.keys().map(String::as_str)
    }
}

impl FromIterator<Series> for EvalContext {
    fn from_iter<I: IntoIterator<Item = Series>>(iter: I) -> Self {
        let mut context = Self::new();
        for series in iter {
            context.insert_series(series);
        }
        context
    }
}

impl From<BTreeMap<String, Series>> for EvalContext {
    fn from(series: BTreeMap<String, Series>) -> Self {
        let mut context = Self::new();
        for (id, s) in series {
            context.insert(&id, s);
        }
        context
    }
}

impl SeriesStore for EvalContext {
    fn lookup(&self, id: &str) -> Option<&Series> {
        self.get_series(id)
    }
}

// ── Function registry ───────────────────────────────────────────────────

/// How a built-in consumes its evaluated parameters. The variant fixes the
/// arity and the parameter kinds.
#[derive(Debug, Clone, Copy)]
pub enum Implementation {
    /// `(series) -> scalar`
    Aggregate(fn(&Series) -> f64),
    /// `(series, periods) -> series`
    Indicator(fn(&Series, NonZeroUsize) -> Series),
    /// `(series, series) -> scalar`
    Pairwise(fn(&Series, &Series) -> f64),
    /// `(series) -> series`
    Transform(fn(&Series) -> Series),
}

impl Implementation {
    #[must_use]
    pub fn arity(&self) -> usize {
        match self {
            Self::Aggregate(_) | Self::Transform(_) => 1,
            Self::Indicator(_) | Self::Pairwise(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub summary: &'static str,
    pub implementation: Implementation,
}

impl FunctionSpec {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.implementation.arity()
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, FormulaError> {
        if args.len() != self.arity() {
            return Err(FormulaError::WrongArity {
                function: self.name.to_owned(),
                expected: self.arity(),
                got: args.len(),
            });
        }

        match self.implementation {
            Implementation::Aggregate(f) => Ok(Value::Scalar(f(self.series_arg(args, 0)?))),
            Implementation::Indicator(f) => {
                let series = self.series_arg(args, 0)?;
                let periods = self.periods_arg(args, 1)?;
                Ok(Value::Series(f(series, periods)))
            }
            Implementation::Pairwise(f) => {
                let left = self.series_arg(args, 0)?;
                let right = self.series_arg(args, 1)?;
                Ok(Value::Scalar(f(left, right)))
            }
            Implementation::Transform(f) => Ok(Value::Series(f(self.series_arg(args, 0)?))),
        }
    }

    fn series_arg<'a>(&self, args: &'a [Value], position: usize) -> Result<&'a Series, FormulaError> {
        match &args[position] {
            Value::Series(series) => Ok(series),
            other => Err(FormulaError::WrongArgumentKind {
                function: self.name.to_owned(),
                position: position + 1,
                expected: ValueKind::Series,
                found: other.kind(),
            }),
        }
    }

    fn periods_arg(&self, args: &[Value], position: usize) -> Result<NonZeroUsize, FormulaError> {
        let value = match &args[position] {
            Value::Scalar(value) => *value,
            other => {
                return Err(FormulaError::WrongArgumentKind {
                    function: self.name.to_owned(),
                    position: position + 1,
                    expected: ValueKind::Scalar,
                    found: other.kind(),
                });
            }
        };

        let integral = value.is_finite() && value.fract() == 0.0 && value <= u32::MAX as f64;
        integral
            .then(|| NonZeroUsize::new(value.max(0.0) as usize))
            .flatten()
            .ok_or_else(|| FormulaError::InvalidPeriods {
                function: self.name.to_owned(),
                value,
            })
    }
}

/// Name-indexed table of functions. The built-in table is created once and
/// shared read-only.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<&'static str, FunctionSpec>,
}

static BUILTIN_REGISTRY: LazyLock<FunctionRegistry> = LazyLock::new(|| {
    let mut registry = FunctionRegistry::new();
    for spec in builtin_functions() {
        registry.register(spec);
    }
    registry
});

fn builtin_functions() -> [FunctionSpec; 11] {
    [
        FunctionSpec {
            name: "SUM",
            summary: "sum of present values",
            implementation: Implementation::Aggregate(es_stats::sum),
        },
        FunctionSpec {
            name: "AVG",
            summary: "mean of present values, 0 when empty",
            implementation: Implementation::Aggregate(es_stats::mean),
        },
        FunctionSpec {
            name: "MIN",
            summary: "smallest present value, 0 when empty",
            implementation: Implementation::Aggregate(es_stats::min),
        },
        FunctionSpec {
            name: "MAX",
            summary: "largest present value, 0 when empty",
            implementation: Implementation::Aggregate(es_stats::max),
        },
        FunctionSpec {
            name: "COUNT",
            summary: "number of present values",
            implementation: Implementation::Aggregate(count_as_scalar),
        },
        FunctionSpec {
            name: "ROC",
            summary: "rate of change in percent over N periods",
            implementation: Implementation::Indicator(es_stats::rate_of_change),
        },
        FunctionSpec {
            name: "MA",
            summary: "simple moving average over N periods",
            implementation: Implementation::Indicator(es_stats::moving_average),
        },
        FunctionSpec {
            name: "RSI",
            summary: "relative strength index over N periods (simple averages)",
            implementation: Implementation::Indicator(es_stats::relative_strength_index),
        },
        FunctionSpec {
            name: "MOMENTUM",
            summary: "difference to the value N periods earlier",
            implementation: Implementation::Indicator(es_stats::momentum),
        },
        FunctionSpec {
            name: "CORRELATION",
            summary: "Pearson correlation over the trailing common length",
            implementation: Implementation::Pairwise(es_stats::correlation),
        },
        FunctionSpec {
            name: "REGRESSION",
            summary: "least-squares trend line against the observation step",
            implementation: Implementation::Transform(es_stats::linear_regression),
        },
    ]
}

fn count_as_scalar(series: &Series) -> f64 {
    es_stats::count(series) as f64
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn builtin() -> &'static Self {
        &BUILTIN_REGISTRY
    }

    /// Add or replace a function. Names are matched exactly, so they should
    /// follow the uppercase call grammar (`[A-Z_]+`) to be reachable.
    pub fn register(&mut self, spec: FunctionSpec) {
        self.functions.insert(spec.name, spec);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionSpec> + '_ {
        self.functions.values()
    }

    /// `(name, arity)` pairs in name order.
    #[must_use]
    pub fn names(&self) -> Vec<(&'static str, usize)> {
        self.iter().map(|spec| (spec.name, spec.arity())).collect()
    }
}

// ── Evaluation ──────────────────────────────────────────────────────────

/// Evaluate a parsed expression. Arguments are evaluated depth-first, left
/// to right, before the function name is resolved, so an argument failure
/// wins over an unknown function. Call nesting is checked against `policy`
/// on the way down, so trees built in code obey the same depth limit as
/// parsed text.
pub fn evaluate<S: SeriesStore + ?Sized>(
    expr: &Expr,
    store: &S,
    registry: &FunctionRegistry,
    policy: &EvalPolicy,
    ledger: &mut CallLedger,
) -> Result<Value, FormulaError> {
    evaluate_node(expr, store, registry, policy, ledger, 0)
}

fn evaluate_node<S: SeriesStore + ?Sized>(
    expr: &Expr,
    store: &S,
    registry: &FunctionRegistry,
    policy: &EvalPolicy,
    ledger: &mut CallLedger,
    depth: usize,
) -> Result<Value, FormulaError> {
    match expr {
        Expr::Literal { value } => Ok(Value::Scalar(*value)),
        Expr::Identifier { name } => store
            .lookup(&name.to_ascii_lowercase())
            .cloned()
            .map(Value::Series)
            .ok_or_else(|| FormulaError::UnknownIdentifier(name.clone())),
        Expr::Call { name, args } => {
            let depth = depth + 1;
            policy.admit_depth(depth)?;
            let values = args
                .iter()
                .map(|arg| evaluate_node(arg, store, registry, policy, ledger, depth))
                .collect::<Result<Vec<_>, _>>()?;

            let spec = registry
                .get(name)
                .ok_or_else(|| FormulaError::UnknownFunction(name.clone()))?;

            let result = spec.call(&values);
            let outcome = match &result {
                Ok(Value::Scalar(value)) => CallOutcome::Scalar { value: *value },
                Ok(Value::Series(series)) => CallOutcome::Series { len: series.len() },
                Err(error) => CallOutcome::Failed {
                    message: error.to_string(),
                },
            };
            #[cfg(feature = "tracing")]
            tracing::trace!(function = %name, depth, outcome = ?outcome, "function call");
            ledger.push(CallRecord {
                depth,
                function: name.clone(),
                argument_kinds: values.iter().map(Value::kind).collect(),
                outcome,
            });
            result
        }
    }
}

/// Parser plus registry plus limits: the entry point callers use.
#[derive(Debug, Clone, Copy)]
pub struct FormulaEngine<'r> {
    registry: &'r FunctionRegistry,
    policy: EvalPolicy,
}

impl FormulaEngine<'static> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(FunctionRegistry::builtin())
    }
}

impl Default for FormulaEngine<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r> FormulaEngine<'r> {
    #[must_use]
    pub fn with_registry(registry: &'r FunctionRegistry) -> Self {
        Self {
            registry,
            policy: EvalPolicy::standard(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: EvalPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &'r FunctionRegistry {
        self.registry
    }

    #[must_use]
    pub fn policy(&self) -> &EvalPolicy {
        &self.policy
    }

    pub fn parse(&self, formula: &str) -> Result<Expr, FormulaError> {
        parse_formula_with_policy(formula, &self.policy)
    }

    pub fn evaluate<S: SeriesStore + ?Sized>(
        &self,
        formula: &str,
        store: &S,
    ) -> Result<Value, FormulaError> {
        let mut ledger = CallLedger::new();
        self.evaluate_with_ledger(formula, store, &mut ledger)
    }

    pub fn evaluate_with_ledger<S: SeriesStore + ?Sized>(
        &self,
        formula: &str,
        store: &S,
        ledger: &mut CallLedger,
    ) -> Result<Value, FormulaError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("evaluate_formula", formula = %formula).entered();

        let result = self
            .parse(formula)
            .and_then(|expr| evaluate(&expr, store, self.registry, &self.policy, ledger));

        #[cfg(feature = "tracing")]
        if let Err(error) = &result {
            tracing::debug!(kind = error.kind(), %error, "formula evaluation failed");
        }
        result
    }
}

/// Evaluate `formula` with the built-in functions and the standard policy.
pub fn evaluate_formula<S: SeriesStore + ?Sized>(
    formula: &str,
    store: &S,
) -> Result<Value, FormulaError> {
    FormulaEngine::new().evaluate(formula, store)
}

// ── Formula parser ──────────────────────────────────────────────────────
//
// Grammar, applied to the formula with all whitespace removed:
//   expr       → call | identifier | number
//   call       → NAME "(" args? ")"        NAME = [A-Z_]+
//   args       → expr ( "," expr )*        split at depth 0, outside quotes
//   identifier → [A-Z_][A-Z0-9_]*
//   number     → sign? digits ( "." digits )? exponent?
//
// A call is recognised by shape alone: a name, an opening parenthesis right
// after it and a closing parenthesis at the very end. The text in between is
// split on top-level commas and each piece is parsed on its own, so stray
// parentheses surface as an invalid argument rather than a separate error.

/// Parse a formula with the standard policy.
pub fn parse_formula(formula: &str) -> Result<Expr, FormulaError> {
    parse_formula_with_policy(formula, &EvalPolicy::standard())
}

pub fn parse_formula_with_policy(formula: &str, policy: &EvalPolicy) -> Result<Expr, FormulaError> {
    policy.admit_formula(formula)?;
    let compact = formula
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();
    if compact.is_empty() {
        return Err(FormulaError::EmptyFormula);
    }
    parse_node(&compact, 0, policy)
}

fn parse_node(source: &str, depth: usize, policy: &EvalPolicy) -> Result<Expr, FormulaError> {
    if let Some((name, params)) = split_call(source) {
        let depth = depth + 1;
        policy.admit_depth(depth)?;
        let args = split_arguments(params)
            .into_iter()
            .map(|arg| parse_node(arg, depth, policy))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Expr::Call {
            name: name.to_owned(),
            args,
        });
    }

    if is_identifier(source) {
        return Ok(Expr::Identifier {
            name: source.to_owned(),
        });
    }

    if let Some(value) = parse_numeric_literal(source) {
        return Ok(Expr::Literal { value });
    }

    Err(FormulaError::InvalidExpression(source.to_owned()))
}

/// `NAME(params)` → `(NAME, params)`.
fn split_call(source: &str) -> Option<(&str, &str)> {
    let name_len = source
        .bytes()
        .take_while(|b| b.is_ascii_uppercase() || *b == b'_')
        .count();
    if name_len == 0
        || source.len() < name_len + 2
        || source.as_bytes()[name_len] != b'('
        || !source.ends_with(')')
    {
        return None;
    }
    Some((&source[..name_len], &source[name_len + 1..source.len() - 1]))
}

/// Split a parameter list on commas that sit outside quotes and outside
/// nested parentheses. An empty list has no arguments.
fn split_arguments(params: &str) -> Vec<&str> {
    if params.is_empty() {
        return Vec::new();
    }

    let bytes = params.as_bytes();
    let mut args = Vec::new();
    let mut start = 0;
    let mut depth: isize = 0;
    let mut in_quotes = false;

    for (idx, &byte) in bytes.iter().enumerate() {
        match byte {
            b'"' if idx == 0 || bytes[idx - 1] != b'\\' => in_quotes = !in_quotes,
            b'(' if !in_quotes => depth += 1,
            b')' if !in_quotes => depth -= 1,
            b',' if !in_quotes && depth == 0 => {
                args.push(&params[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    args.push(&params[start..]);
    args
}

fn is_identifier(source: &str) -> bool {
    let mut bytes = source.bytes();
    bytes
        .next()
        .is_some_and(|first| first.is_ascii_uppercase() || first == b'_')
        && bytes.all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}
