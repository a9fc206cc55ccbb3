#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use es_frame::{FrameError, Series};
use es_types::{Observation, TypeError, parse_observation_value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("csv input needs a date and a value column, found {found}")]
    MissingColumns { found: usize },
    #[error("series {series:?}, row {row}: {source}")]
    Cell {
        series: String,
        row: usize,
        #[source]
        source: TypeError,
    },
    #[error("series {series:?}: {source}")]
    Series {
        series: String,
        #[source]
        source: FrameError,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

// ── Readers ─────────────────────────────────────────────────────────────

/// Read one series from a two-column export.
///
/// The date column is the one headed `date` (any case), otherwise the first;
/// the value column is the one headed `value`, otherwise the second. Missing
/// markers such as `.` or `NA` become null observations. Dates must be
/// `YYYY-MM-DD` and strictly ascending.
pub fn read_series_csv_str(name: &str, input: &str) -> Result<Series, IoError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input.as_bytes());

    let headers = reader.headers().cloned().map_err(IoError::from)?;
    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }
    let (date_col, value_col) = locate_columns(&headers)?;

    let mut observations = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let cell_error = |source| IoError::Cell {
            series: name.to_owned(),
            row: row + 1,
            source,
        };
        let date = record.get(date_col).unwrap_or_default();
        let value = parse_observation_value(record.get(value_col).unwrap_or_default())
            .map_err(cell_error)?;
        observations.push(Observation::new(date, value));
    }

    validated(name, observations)
}

fn locate_columns(headers: &StringRecord) -> Result<(usize, usize), IoError> {
    if headers.len() < 2 {
        return Err(IoError::MissingColumns {
            found: headers.len(),
        });
    }
    let named = |wanted: &str| {
        headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(wanted))
    };
    let date_col = named("date").unwrap_or(0);
    let value_col = named("value").unwrap_or(if date_col == 0 { 1 } else { 0 });
    Ok((date_col, value_col))
}

/// Read one series from a JSON array of `[date, value|null]` pairs.
pub fn read_series_json_str(name: &str, input: &str) -> Result<Series, IoError> {
    let observations: Vec<Observation> = serde_json::from_str(input)?;
    validated(name, observations)
}

/// Read a data context: a JSON object mapping series ids to arrays of
/// `[date, value|null]` pairs. Ids are lowercased, matching how formula
/// identifiers are resolved.
pub fn read_context_json_str(input: &str) -> Result<BTreeMap<String, Series>, IoError> {
    let raw: BTreeMap<String, Vec<Observation>> = serde_json::from_str(input)?;
    raw.into_iter()
        .map(|(id, observations)| {
            let id = id.to_ascii_lowercase();
            let series = validated(&id, observations)?;
            Ok((id, series))
        })
        .collect()
}

pub fn read_series_csv(name: &str, path: &Path) -> Result<Series, IoError> {
    let input = std::fs::read_to_string(path)?;
    read_series_csv_str(name, &input)
}

pub fn read_context_json(path: &Path) -> Result<BTreeMap<String, Series>, IoError> {
    let input = std::fs::read_to_string(path)?;
    read_context_json_str(&input)
}

fn validated(name: &str, observations: Vec<Observation>) -> Result<Series, IoError> {
    let series = Series::from_observations(name, observations);
    series.validate_dates().map_err(|source| IoError::Series {
        series: name.to_owned(),
        source,
    })?;
    Ok(series)
}

// ── Writers ─────────────────────────────────────────────────────────────

/// `date,value` CSV with an empty cell for missing observations.
pub fn write_series_csv_string(series: &Series) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(["date", "value"])?;

    for (date, value) in series.iter() {
        let cell = value.map_or_else(String::new, |v| v.to_string());
        writer.write_record([date, cell.as_str()])?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

pub fn write_series_json_string(series: &Series) -> Result<String, IoError> {
    Ok(serde_json::to_string(&series.to_observations())?)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use es_frame::{FrameError, Series};
    use es_index::IndexError;
    use es_types::{Observation, TypeError};

    use super::{
        IoError, read_context_json, read_context_json_str, read_series_csv,
        read_series_csv_str, read_series_json_str, write_series_csv_string,
        write_series_json_string,
    };

    #[test]
    fn csv_reader_maps_missing_markers_to_null() {
        let input = "date,value\n2020-01-01,1.5\n2020-02-01,.\n2020-03-01,NA\n2020-04-01, 4 \n";
        let series = read_series_csv_str("gdp", input).expect("read");
        assert_eq!(
            series.to_observations(),
            vec![
                Observation::present("2020-01-01", 1.5),
                Observation::missing("2020-02-01"),
                Observation::missing("2020-03-01"),
                Observation::present("2020-04-01", 4.0),
            ]
        );
        assert_eq!(series.name(), "gdp");
    }

    #[test]
    fn csv_reader_finds_named_columns_in_any_order() {
        let input = "VALUE,Date,note\n3,2021-01-01,x\n4,2021-02-01,y\n";
        let series = read_series_csv_str("cpi", input).expect("read");
        assert_eq!(series.numeric_values(), vec![3.0, 4.0]);
        assert_eq!(series.index().labels(), &["2021-01-01", "2021-02-01"]);
    }

    #[test]
    fn csv_reader_accepts_vendor_headers_positionally() {
        let input = "observation_date,UNRATE\n2020-01-01,3.5\n";
        let series = read_series_csv_str("unrate", input).expect("read");
        assert_eq!(series.numeric_values(), vec![3.5]);
    }

    #[test]
    fn csv_reader_takes_value_from_first_non_date_column() {
        let input = "UNRATE,date\n3.5,2020-01-01\n3.6,2020-02-01\n";
        let series = read_series_csv_str("unrate", input).expect("read");
        assert_eq!(series.numeric_values(), vec![3.5, 3.6]);
        assert_eq!(series.index().labels(), &["2020-01-01", "2020-02-01"]);
    }

    #[test]
    fn csv_reader_rejects_single_column() {
        let err = read_series_csv_str("x", "date\n2020-01-01\n").expect_err("one column");
        assert!(matches!(err, IoError::MissingColumns { found: 1 }));
    }

    #[test]
    fn csv_reader_reports_row_of_bad_value() {
        let input = "date,value\n2020-01-01,1\n2020-02-01,abc\n";
        let err = read_series_csv_str("x", input).expect_err("bad cell");
        match err {
            IoError::Cell { row, source, .. } => {
                assert_eq!(row, 2);
                assert_eq!(
                    source,
                    TypeError::NonNumericValue {
                        value: "abc".to_owned()
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn csv_reader_rejects_unordered_and_malformed_dates() {
        let unordered = "date,value\n2020-02-01,1\n2020-01-01,2\n";
        assert!(matches!(
            read_series_csv_str("x", unordered),
            Err(IoError::Series {
                source: FrameError::Index(IndexError::NotAscending { .. }),
                ..
            })
        ));

        let malformed = "date,value\n2020/01/01,1\n";
        assert!(matches!(
            read_series_csv_str("x", malformed),
            Err(IoError::Series {
                source: FrameError::Index(IndexError::Type(_)),
                ..
            })
        ));
    }

    #[test]
    fn json_series_reader_accepts_null_values() {
        let series =
            read_series_json_str("x", r#"[["2020-01-01",1],["2020-02-01",null]]"#).expect("read");
        assert_eq!(series.count_present(), 1);
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn context_reader_lowercases_ids() {
        let input = r#"{"GDP":[["2020-01-01",1.0]],"cpi":[["2020-01-01",2.0],["2020-02-01",3.0]]}"#;
        let context = read_context_json_str(input).expect("read");
        assert_eq!(context.keys().collect::<Vec<_>>(), vec!["cpi", "gdp"]);
        assert_eq!(context["gdp"].name(), "gdp");
        assert_eq!(context["cpi"].len(), 2);
    }

    #[test]
    fn context_reader_rejects_non_numeric_values() {
        let err = read_context_json_str(r#"{"a":[["2020-01-01","x"]]}"#).expect_err("string value");
        assert!(matches!(err, IoError::Json(_)));
    }

    #[test]
    fn csv_writer_round_trips_through_reader() {
        let series = Series::from_observations(
            "gdp",
            vec![
                Observation::present("2020-01-01", 1.25),
                Observation::missing("2020-02-01"),
            ],
        );
        let out = write_series_csv_string(&series).expect("write");
        assert_eq!(out, "date,value\n2020-01-01,1.25\n2020-02-01,\n");
        assert_eq!(read_series_csv_str("gdp", &out).expect("reread"), series);
    }

    #[test]
    fn json_writer_emits_pairs() {
        let series = Series::from_pairs("x", [("2020-01-01", 2.0)]);
        assert_eq!(
            write_series_json_string(&series).expect("write"),
            r#"[["2020-01-01",2.0]]"#
        );
    }

    #[test]
    fn path_readers_load_files() {
        let mut csv_file = tempfile::NamedTempFile::new().expect("tmp csv");
        write!(csv_file, "date,value\n2020-01-01,7\n").expect("write csv");
        let series = read_series_csv("gdp", csv_file.path()).expect("read csv");
        assert_eq!(series.numeric_values(), vec![7.0]);

        let mut json_file = tempfile::NamedTempFile::new().expect("tmp json");
        write!(json_file, r#"{{"gdp":[["2020-01-01",7]]}}"#).expect("write json");
        let context = read_context_json(json_file.path()).expect("read json");
        assert_eq!(context["gdp"], series);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let err = read_series_csv("x", &dir.path().join("absent.csv")).expect_err("absent");
        assert!(matches!(err, IoError::Io(_)));
    }
}
