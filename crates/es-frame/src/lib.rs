#![forbid(unsafe_code)]

use es_index::{DateIndex, DateRange, IndexError};
use es_types::Observation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match value length ({value_len})")]
    LengthMismatch { index_len: usize, value_len: usize },
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// A named series of observations. The date index and the value list are
/// aligned position by position; every constructor and transform keeps them
/// the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesParts")]
pub struct Series {
    name: String,
    index: DateIndex,
    values: Vec<Option<f64>>,
}

#[derive(Deserialize)]
struct SeriesParts {
    name: String,
    index: DateIndex,
    values: Vec<Option<f64>>,
}

impl TryFrom<SeriesParts> for Series {
    type Error = FrameError;

    fn try_from(parts: SeriesParts) -> Result<Self, Self::Error> {
        Self::new(parts.name, parts.index, parts.values)
    }
}

impl Series {
    pub fn new(
        name: impl Into<String>,
        index: DateIndex,
        values: Vec<Option<f64>>,
    ) -> Result<Self, FrameError> {
        if index.len() != values.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                value_len: values.len(),
            });
        }

        Ok(Self {
            name: name.into(),
            index,
            values,
        })
    }

    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: DateIndex::default(),
            values: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_observations(
        name: impl Into<String>,
        observations: impl IntoIterator<Item = Observation>,
    ) -> Self {
        let (labels, values): (Vec<String>, Vec<Option<f64>>) = observations
            .into_iter()
            .map(|observation| (observation.date, observation.value))
            .unzip();
        Self {
            name: name.into(),
            index: DateIndex::new(labels),
            values,
        }
    }

    /// Build a fully present series from `(date, value)` pairs.
    #[must_use]
    pub fn from_pairs<D: Into<String>>(
        name: impl Into<String>,
        pairs: impl IntoIterator<Item = (D, f64)>,
    ) -> Self {
        Self::from_observations(
            name,
            pairs
                .into_iter()
                .map(|(date, value)| Observation::present(date, value)),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn index(&self) -> &DateIndex {
        &self.index
    }

    #[must_use]
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> + '_ {
        self.index
            .labels()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    #[must_use]
    pub fn observation(&self, position: usize) -> Option<Observation> {
        let date = self.index.label(position)?;
        let value = *self.values.get(position)?;
        Some(Observation::new(date, value))
    }

    #[must_use]
    pub fn to_observations(&self) -> Vec<Observation> {
        self.iter()
            .map(|(date, value)| Observation::new(date, value))
            .collect()
    }

    /// Present values in order, with missing observations dropped. The result
    /// no longer lines up with the date index once anything was dropped; use
    /// [`Series::present`] when dates must stay paired.
    #[must_use]
    pub fn numeric_values(&self) -> Vec<f64> {
        self.values.iter().flatten().copied().collect()
    }

    #[must_use]
    pub fn count_present(&self) -> usize {
        self.values.iter().filter(|value| value.is_some()).count()
    }

    /// Copy of the series restricted to present observations, dates and
    /// values still paired.
    #[must_use]
    pub fn present(&self) -> Self {
        if self.count_present() == self.len() {
            return self.clone();
        }
        let positions = self
            .values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_some())
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        self.take(&positions)
    }

    /// Last `n` observations (all of them when the series is shorter).
    #[must_use]
    pub fn tail(&self, n: usize) -> Self {
        let start = self.len().saturating_sub(n);
        let positions = (start..self.len()).collect::<Vec<_>>();
        self.take(&positions)
    }

    /// Observations whose date falls inside `range`.
    #[must_use]
    pub fn between(&self, range: &DateRange) -> Self {
        let positions = range.positions_within(&self.index);
        #[cfg(feature = "tracing")]
        tracing::trace!(
            series = %self.name,
            kept = positions.len(),
            dropped = self.len() - positions.len(),
            "trimmed series to date range"
        );
        self.take(&positions)
    }

    /// Check the date labels: well-formed and strictly ascending.
    pub fn validate_dates(&self) -> Result<(), FrameError> {
        let result = self.index.validate().map_err(FrameError::from);
        #[cfg(feature = "tracing")]
        if let Err(error) = &result {
            tracing::debug!(series = %self.name, %error, "series rejected");
        }
        result
    }

    fn take(&self, positions: &[usize]) -> Self {
        let positions = positions
            .iter()
            .copied()
            .filter(|&idx| idx < self.len())
            .collect::<Vec<_>>();
        Self {
            name: self.name.clone(),
            index: self.index.take(&positions),
            values: positions.iter().map(|&idx| self.values[idx]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use es_index::{DateIndex, DateRange};
    use es_types::Observation;

    use super::{FrameError, Series};

    fn gdp() -> Series {
        Series::from_observations(
            "gdp",
            vec![
                Observation::present("2020-01-01", 1.0),
                Observation::missing("2020-02-01"),
                Observation::present("2020-03-01", 3.0),
                Observation::present("2020-04-01", 4.0),
            ],
        )
    }

    #[test]
    fn deserialize_rejects_misaligned_values() {
        let err = serde_json::from_str::<Series>(
            r#"{"name":"x","index":{"labels":["2020-01-01"]},"values":[1.0,2.0,3.0]}"#,
        )
        .expect_err("must reject");
        assert!(err.to_string().contains("does not match value length"));

        let series = serde_json::from_str::<Series>(
            r#"{"name":"x","index":{"labels":["2020-01-01"]},"values":[1.0]}"#,
        )
        .expect("aligned series");
        assert_eq!(series.len(), series.iter().count());
    }

    #[test]
    fn new_rejects_misaligned_values() {
        let err = Series::new(
            "gdp",
            DateIndex::new(vec!["2020-01-01".to_owned()]),
            vec![Some(1.0), Some(2.0)],
        )
        .expect_err("must reject");
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                index_len: 1,
                value_len: 2
            }
        );
    }

    #[test]
    fn numeric_values_drop_missing_entries() {
        let series = gdp();
        assert_eq!(series.numeric_values(), vec![1.0, 3.0, 4.0]);
        assert_eq!(series.count_present(), 3);
    }

    #[test]
    fn present_keeps_dates_paired_with_values() {
        let present = gdp().present();
        assert_eq!(
            present.to_observations(),
            vec![
                Observation::present("2020-01-01", 1.0),
                Observation::present("2020-03-01", 3.0),
                Observation::present("2020-04-01", 4.0),
            ]
        );
        assert_eq!(present.name(), "gdp");
    }

    #[test]
    fn tail_keeps_trailing_observations() {
        let tail = gdp().tail(2);
        assert_eq!(tail.index().labels(), &["2020-03-01", "2020-04-01"]);
        assert_eq!(gdp().tail(10).len(), 4);
        assert!(gdp().tail(0).is_empty());
    }

    #[test]
    fn between_trims_to_inclusive_range() {
        let range = DateRange::parse(Some("2020-02-01"), Some("2020-03-01")).expect("range");
        let trimmed = gdp().between(&range);
        assert_eq!(
            trimmed.to_observations(),
            vec![
                Observation::missing("2020-02-01"),
                Observation::present("2020-03-01", 3.0),
            ]
        );
    }

    #[test]
    fn validate_dates_flags_unordered_series() {
        let series = Series::from_pairs("cpi", [("2020-02-01", 1.0), ("2020-01-01", 2.0)]);
        assert!(matches!(
            series.validate_dates(),
            Err(FrameError::Index(_))
        ));
        gdp().validate_dates().expect("gdp dates are ordered");
    }

    #[test]
    fn series_round_trips_through_json() {
        let series = gdp();
        let json = serde_json::to_string(&series).expect("ser");
        let back: Series = serde_json::from_str(&json).expect("de");
        assert_eq!(back, series);
    }
}
