#![forbid(unsafe_code)]

use std::collections::HashSet;

use chrono::NaiveDate;
use es_types::{TypeError, parse_observation_date};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexError {
    #[error("dates must be strictly ascending: {previous} is followed by {current} at position {position}")]
    NotAscending {
        position: usize,
        previous: String,
        current: String,
    },
    #[error("date range start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Ordered date labels of a series. Labels are kept as the `YYYY-MM-DD`
/// strings the sources deliver; zero-padded ISO dates sort lexically in
/// chronological order, so ordering checks compare the strings directly.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateIndex {
    labels: Vec<String>,
}

impl DateIndex {
    #[must_use]
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn label(&self, position: usize) -> Option<&str> {
        self.labels.get(position).map(String::as_str)
    }

    #[must_use]
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.labels.iter().position(|label| label == needle)
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.labels.len());
        self.labels.iter().any(|label| !seen.insert(label.as_str()))
    }

    #[must_use]
    pub fn is_strictly_ascending(&self) -> bool {
        self.labels.windows(2).all(|pair| pair[0] < pair[1])
    }

    /// Check that every label is a well-formed date and that the labels are
    /// strictly ascending.
    pub fn validate(&self) -> Result<(), IndexError> {
        for label in &self.labels {
            parse_observation_date(label)?;
        }
        if let Some(position) = self.labels.windows(2).position(|pair| pair[0] >= pair[1]) {
            return Err(IndexError::NotAscending {
                position: position + 1,
                previous: self.labels[position].clone(),
                current: self.labels[position + 1].clone(),
            });
        }
        Ok(())
    }

    /// Build a new index from the labels at `positions`, in that order.
    /// Out-of-range positions are skipped.
    #[must_use]
    pub fn take(&self, positions: &[usize]) -> Self {
        Self::new(
            positions
                .iter()
                .filter_map(|&idx| self.labels.get(idx).cloned())
                .collect(),
        )
    }
}

impl FromIterator<String> for DateIndex {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Inclusive date window used to trim series before evaluation. Either bound
/// may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "DateRangeBounds")]
pub struct DateRange {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct DateRangeBounds {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl TryFrom<DateRangeBounds> for DateRange {
    type Error = IndexError;

    fn try_from(bounds: DateRangeBounds) -> Result<Self, Self::Error> {
        Self::new(bounds.start, bounds.end)
    }
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, IndexError> {
        if let (Some(start), Some(end)) = (start, end)
            && start > end
        {
            return Err(IndexError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, IndexError> {
        let start = start.map(parse_observation_date).transpose()?;
        let end = end.map(parse_observation_date).transpose()?;
        Self::new(start, end)
    }

    #[must_use]
    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    /// Labels that are not valid dates are never inside a range.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        let Ok(date) = parse_observation_date(label) else {
            return false;
        };
        self.start.is_none_or(|start| date >= start) && self.end.is_none_or(|end| date <= end)
    }

    #[must_use]
    pub fn positions_within(&self, index: &DateIndex) -> Vec<usize> {
        index
            .labels()
            .iter()
            .enumerate()
            .filter(|(_, label)| self.contains(label))
            .map(|(idx, _)| idx)
            .collect()
    }
}
