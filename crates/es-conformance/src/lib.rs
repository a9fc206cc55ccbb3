#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use es_expr::{EvalContext, FormulaEngine, Value};
use es_frame::Series;
use es_runtime::CallLedger;
use es_types::Observation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        }
    }

    #[must_use]
    pub fn with_fixture_root(fixture_root: impl Into<PathBuf>) -> Self {
        Self {
            fixture_root: fixture_root.into(),
        }
    }

    #[must_use]
    pub fn case_fixture_root(&self) -> PathBuf {
        self.fixture_root.join("cases")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    HarnessReport {
        suite: "smoke",
        fixture_count: list_fixture_files(&config.case_fixture_root())
            .map(|files| files.len())
            .unwrap_or(0),
    }
}

/// What a case must produce: a scalar, a series of `[date, value]` pairs, or
/// a failure of the given kind (`FormulaError::kind`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureExpected {
    Scalar(f64),
    Series(Vec<Observation>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaFixture {
    pub case_id: String,
    pub formula: String,
    #[serde(default)]
    pub context: BTreeMap<String, Vec<Observation>>,
    pub expected: FixtureExpected,
    #[serde(default)]
    pub tolerance: Option<f64>,
}

impl FormulaFixture {
    #[must_use]
    pub fn eval_context(&self) -> EvalContext {
        let mut context = EvalContext::new();
        for (id, observations) in &self.context {
            context.insert(id, Series::from_observations(id.as_str(), observations.clone()));
        }
        context
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub formula: String,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    pub function_calls: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseResult> + '_ {
        self.results
            .iter()
            .filter(|result| result.status == CaseStatus::Fail)
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("fixture {}: {source}", path.display())]
    FixtureFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no fixture with case id {0:?}")]
    UnknownCase(String),
    #[error("suite is not green: {failed} of {fixture_count} case(s) failed")]
    NotGreen { failed: usize, fixture_count: usize },
}

pub fn run_suite(config: &HarnessConfig) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(config, None)?;
    Ok(build_report("formula_cases".to_owned(), &fixtures))
}

pub fn run_case_by_id(config: &HarnessConfig, case_id: &str) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(config, Some(case_id))?;
    if fixtures.is_empty() {
        return Err(HarnessError::UnknownCase(case_id.to_owned()));
    }
    Ok(build_report(format!("formula_cases:{case_id}"), &fixtures))
}

pub fn enforce_green(report: &SuiteReport) -> Result<(), HarnessError> {
    if report.is_green() {
        return Ok(());
    }
    Err(HarnessError::NotGreen {
        failed: report.failed,
        fixture_count: report.fixture_count,
    })
}

pub fn write_report(report: &SuiteReport, path: &Path) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

#[must_use]
pub fn run_fixture(fixture: &FormulaFixture) -> CaseResult {
    let context = fixture.eval_context();
    let mut ledger = CallLedger::new();
    let outcome = FormulaEngine::new().evaluate_with_ledger(&fixture.formula, &context, &mut ledger);
    let tolerance = fixture.tolerance.unwrap_or(DEFAULT_TOLERANCE);
    let mismatch = compare_outcome(&fixture.expected, outcome, tolerance).err();

    CaseResult {
        case_id: fixture.case_id.clone(),
        formula: fixture.formula.clone(),
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        function_calls: ledger.len(),
    }
}

fn build_report(suite: String, fixtures: &[FormulaFixture]) -> SuiteReport {
    let results = fixtures.iter().map(run_fixture).collect::<Vec<_>>();
    let failed = results
        .iter()
        .filter(|result| matches!(result.status, CaseStatus::Fail))
        .count();

    SuiteReport {
        suite,
        fixture_count: results.len(),
        passed: results.len().saturating_sub(failed),
        failed,
        results,
    }
}

fn compare_outcome(
    expected: &FixtureExpected,
    outcome: Result<Value, es_expr::FormulaError>,
    tolerance: f64,
) -> Result<(), String> {
    match (expected, outcome) {
        (FixtureExpected::Error(kind), Err(error)) => {
            if error.kind() == kind.as_str() {
                Ok(())
            } else {
                Err(format!("error kind mismatch: actual={}, expected={kind} ({error})", error.kind()))
            }
        }
        (_, Err(error)) => Err(format!("unexpected error: {} ({error})", error.kind())),
        (FixtureExpected::Error(kind), Ok(value)) => Err(format!(
            "expected error {kind}, got a {} result",
            value.kind()
        )),
        (FixtureExpected::Scalar(expected), Ok(Value::Scalar(actual))) => {
            if approx_eq(actual, *expected, tolerance) {
                Ok(())
            } else {
                Err(format!("scalar mismatch: actual={actual}, expected={expected}"))
            }
        }
        (FixtureExpected::Series(expected), Ok(Value::Series(actual))) => {
            compare_series(&actual, expected, tolerance)
        }
        (_, Ok(value)) => Err(format!("result kind mismatch: actual={}", value.kind())),
    }
}

fn compare_series(actual: &Series, expected: &[Observation], tolerance: f64) -> Result<(), String> {
    if actual.len() != expected.len() {
        return Err(format!(
            "series length mismatch: actual={}, expected={}",
            actual.len(),
            expected.len()
        ));
    }

    for (position, ((date, value), want)) in actual.iter().zip(expected).enumerate() {
        if date != want.date {
            return Err(format!(
                "date mismatch at {position}: actual={date}, expected={}",
                want.date
            ));
        }
        let matches = match (value, want.value) {
            (None, None) => true,
            (Some(a), Some(b)) => approx_eq(a, b, tolerance),
            _ => false,
        };
        if !matches {
            return Err(format!(
                "value mismatch at {date}: actual={value:?}, expected={:?}",
                want.value
            ));
        }
    }
    Ok(())
}

fn approx_eq(actual: f64, expected: f64, tolerance: f64) -> bool {
    actual == expected || (actual - expected).abs() <= tolerance
}

fn load_fixtures(
    config: &HarnessConfig,
    case_filter: Option<&str>,
) -> Result<Vec<FormulaFixture>, HarnessError> {
    let fixture_files = list_fixture_files(&config.case_fixture_root())?;
    let mut fixtures = Vec::with_capacity(fixture_files.len());

    for fixture_path in fixture_files {
        let fixture = load_fixture(&fixture_path)?;
        if case_filter.is_none_or(|case_id| fixture.case_id == case_id) {
            fixtures.push(fixture);
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture(path: &Path) -> Result<FormulaFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|source| HarnessError::FixtureFormat {
        path: path.to_path_buf(),
        source,
    })
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use es_types::Observation;

    use super::{
        CaseStatus, FixtureExpected, FormulaFixture, HarnessConfig, HarnessError, enforce_green,
        run_case_by_id, run_fixture, run_suite, write_report,
    };

    fn fixture(formula: &str, expected: FixtureExpected) -> FormulaFixture {
        FormulaFixture {
            case_id: "inline".to_owned(),
            formula: formula.to_owned(),
            context: [(
                "GDP".to_owned(),
                vec![
                    Observation::present("2020-01-01", 1.0),
                    Observation::present("2020-02-01", 2.0),
                    Observation::present("2020-03-01", 3.0),
                ],
            )]
            .into_iter()
            .collect(),
            expected,
            tolerance: None,
        }
    }

    #[test]
    fn fixture_expectation_parses_from_wire_shape() {
        let body = r#"{
            "case_id": "ma",
            "formula": "MA(GDP,2)",
            "context": {"gdp": [["2020-01-01", 1], ["2020-02-01", null]]},
            "expected": {"series": [["2020-02-01", 1.5]]},
            "tolerance": 1e-6
        }"#;
        let parsed: FormulaFixture = serde_json::from_str(body).expect("fixture");
        assert_eq!(
            parsed.expected,
            FixtureExpected::Series(vec![Observation::present("2020-02-01", 1.5)])
        );
        assert_eq!(parsed.context["gdp"][1], Observation::missing("2020-02-01"));
        assert_eq!(parsed.tolerance, Some(1e-6));
    }

    #[test]
    fn context_ids_are_lowercased() {
        let result = run_fixture(&fixture("SUM(GDP)", FixtureExpected::Scalar(6.0)));
        assert_eq!(result.status, CaseStatus::Pass, "{:?}", result.mismatch);
        assert_eq!(result.function_calls, 1);
    }

    #[test]
    fn mismatches_are_described() {
        let wrong_value = run_fixture(&fixture("AVG(GDP)", FixtureExpected::Scalar(3.0)));
        assert_eq!(wrong_value.status, CaseStatus::Fail);
        assert!(
            wrong_value
                .mismatch
                .as_deref()
                .is_some_and(|m| m.starts_with("scalar mismatch"))
        );

        let wrong_kind = run_fixture(&fixture(
            "MA(GDP,2)",
            FixtureExpected::Error("invalid_periods".to_owned()),
        ));
        assert!(
            wrong_kind
                .mismatch
                .as_deref()
                .is_some_and(|m| m.contains("got a series result"))
        );

        let wrong_error = run_fixture(&fixture("FOO", FixtureExpected::Scalar(0.0)));
        assert!(
            wrong_error
                .mismatch
                .as_deref()
                .is_some_and(|m| m.starts_with("unexpected error: unknown_identifier"))
        );
    }

    #[test]
    fn series_dates_must_match() {
        let result = run_fixture(&fixture(
            "MA(GDP,2)",
            FixtureExpected::Series(vec![
                Observation::present("2020-01-01", 1.5),
                Observation::present("2020-02-01", 2.5),
            ]),
        ));
        assert!(
            result
                .mismatch
                .as_deref()
                .is_some_and(|m| m.starts_with("date mismatch at 0"))
        );
    }

    #[test]
    fn bundled_suite_is_green() {
        let report = run_suite(&HarnessConfig::default_paths()).expect("suite");
        let failures = report
            .failures()
            .map(|result| format!("{}: {:?}", result.case_id, result.mismatch))
            .collect::<Vec<_>>();
        assert!(report.is_green(), "failures: {failures:#?}");
        enforce_green(&report).expect("green");
    }

    #[test]
    fn unknown_case_id_is_an_error() {
        let err = run_case_by_id(&HarnessConfig::default_paths(), "no_such_case")
            .expect_err("unknown");
        assert!(matches!(err, HarnessError::UnknownCase(_)));
    }

    #[test]
    fn empty_fixture_root_is_not_green() {
        let dir = tempfile::tempdir().expect("tmp");
        let config = HarnessConfig::with_fixture_root(dir.path().join("fixtures"));
        let report = run_suite(&config).expect("suite");
        assert_eq!(report.fixture_count, 0);
        assert!(!report.is_green());
        assert!(matches!(
            enforce_green(&report),
            Err(HarnessError::NotGreen { .. })
        ));
    }

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().expect("tmp");
        let report = run_case_by_id(&HarnessConfig::default_paths(), "agg_sum_basic").expect("case");
        let path = dir.path().join("reports/suite.json");
        write_report(&report, &path).expect("write");

        let body = std::fs::read_to_string(&path).expect("read back");
        let json: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert_eq!(json["fixture_count"], 1);
        assert_eq!(json["results"][0]["status"], "pass");
    }
}
