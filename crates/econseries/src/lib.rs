#![forbid(unsafe_code)]

//! Formula engine for economic time series.
//!
//! ```text
//! let mut context = EvalContext::new();
//! context.insert_series(Series::from_pairs("gdp", observations));
//! let value = evaluate_formula("ROC(MA(GDP,3),2)", &context)?;
//! ```
//!
//! Formulas name series by identifier (`GDP`, resolved case-insensitively
//! against the context), take numeric literals, and call the built-in
//! functions listed by [`FunctionRegistry::names`].

use std::path::{Path, PathBuf};

pub use es_expr::{
    EvalContext, Expr, FormulaEngine, FormulaError, FunctionRegistry, FunctionSpec,
    Implementation, SeriesStore, Value, evaluate, evaluate_formula, parse_formula,
    parse_formula_with_policy,
};
pub use es_frame::{FrameError, Series};
pub use es_index::{DateIndex, DateRange, IndexError};
pub use es_io::{
    IoError, read_context_json, read_context_json_str, read_series_csv, read_series_csv_str,
    read_series_json_str, write_series_csv_string, write_series_json_string,
};
pub use es_runtime::{CallLedger, CallOutcome, CallRecord, EvalPolicy, PolicyViolation};
pub use es_stats as stats;
pub use es_types::{Observation, TypeError, ValueKind};

/// Files a data context is assembled from, plus the window every series is
/// trimmed to before evaluation.
#[derive(Debug, Clone, Default)]
pub struct ContextSources {
    pub series_files: Vec<(String, PathBuf)>,
    pub context_files: Vec<PathBuf>,
    pub range: DateRange,
}

impl ContextSources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_series_file(mut self, id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.series_files
            .push((id.into(), path.as_ref().to_path_buf()));
        self
    }

    #[must_use]
    pub fn with_context_file(mut self, path: impl AsRef<Path>) -> Self {
        self.context_files.push(path.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Load every source into one context. Context files are read first and
    /// single-series files afterwards, so a `--series` entry replaces a
    /// context entry with the same id.
    pub fn load(&self) -> Result<EvalContext, IoError> {
        let mut context = EvalContext::new();
        for path in &self.context_files {
            for (id, series) in read_context_json(path)? {
                context.insert(&id, series.between(&self.range));
            }
        }
        for (id, path) in &self.series_files {
            let series = read_series_csv(&id.to_ascii_lowercase(), path)?;
            context.insert(id, series.between(&self.range));
        }
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{ContextSources, DateRange, SeriesStore, Value, evaluate_formula};

    #[test]
    fn sources_load_trim_and_evaluate() {
        let dir = tempfile::tempdir().expect("tmp");
        let csv_path = dir.path().join("gdp.csv");
        fs::write(
            &csv_path,
            "date,value\n2019-12-01,100\n2020-01-01,1\n2020-02-01,2\n2020-03-01,3\n",
        )
        .expect("write csv");
        let json_path = dir.path().join("context.json");
        fs::write(
            &json_path,
            r#"{"CPI":[["2020-01-01",5],["2020-02-01",null],["2021-01-01",9]]}"#,
        )
        .expect("write json");

        let range = DateRange::parse(Some("2020-01-01"), Some("2020-12-31")).expect("range");
        let context = ContextSources::new()
            .with_series_file("GDP", &csv_path)
            .with_context_file(&json_path)
            .with_range(range)
            .load()
            .expect("load");

        assert_eq!(context.ids().collect::<Vec<_>>(), vec!["cpi", "gdp"]);
        assert_eq!(context.lookup("cpi").expect("cpi").len(), 2);
        assert_eq!(evaluate_formula("SUM(GDP)", &context), Ok(Value::Scalar(6.0)));
        assert_eq!(evaluate_formula("COUNT(CPI)", &context), Ok(Value::Scalar(1.0)));
    }

    #[test]
    fn series_file_overrides_context_entry() {
        let dir = tempfile::tempdir().expect("tmp");
        let json_path = dir.path().join("context.json");
        fs::write(&json_path, r#"{"gdp":[["2020-01-01",1]]}"#).expect("write json");
        let csv_path = dir.path().join("gdp.csv");
        fs::write(&csv_path, "date,value\n2020-01-01,42\n").expect("write csv");

        let context = ContextSources::new()
            .with_context_file(&json_path)
            .with_series_file("gdp", &csv_path)
            .load()
            .expect("load");
        assert_eq!(evaluate_formula("MAX(GDP)", &context), Ok(Value::Scalar(42.0)));
    }

    #[test]
    fn missing_source_file_fails_load() {
        let dir = tempfile::tempdir().expect("tmp");
        let err = ContextSources::new()
            .with_series_file("gdp", dir.path().join("absent.csv"))
            .load()
            .expect_err("absent");
        assert!(matches!(err, super::IoError::Io(_)));
    }
}
