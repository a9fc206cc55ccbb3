#![forbid(unsafe_code)]

//! Numeric algorithms behind the formula functions.
//!
//! Aggregates and [`correlation`] work on the present values of a series and
//! ignore dates. The indicators and [`linear_regression`] work on the present
//! observations with dates still attached, so every output value carries the
//! date of the observation it was computed at.

use std::num::NonZeroUsize;

use es_frame::Series;
use es_types::Observation;

// ── Aggregates ──────────────────────────────────────────────────────────

#[must_use]
pub fn sum(series: &Series) -> f64 {
    series.values().iter().flatten().sum()
}

/// Arithmetic mean of the present values; `0.0` for an empty series.
#[must_use]
pub fn mean(series: &Series) -> f64 {
    let count = series.count_present();
    if count == 0 {
        return 0.0;
    }
    sum(series) / count as f64
}

/// Smallest present value; `0.0` for an empty series.
#[must_use]
pub fn min(series: &Series) -> f64 {
    series
        .values()
        .iter()
        .flatten()
        .copied()
        .reduce(f64::min)
        .unwrap_or(0.0)
}

/// Largest present value; `0.0` for an empty series.
#[must_use]
pub fn max(series: &Series) -> f64 {
    series
        .values()
        .iter()
        .flatten()
        .copied()
        .reduce(f64::max)
        .unwrap_or(0.0)
}

/// Number of present observations.
#[must_use]
pub fn count(series: &Series) -> usize {
    series.count_present()
}

// ── Technical indicators ────────────────────────────────────────────────

struct Points {
    dates: Vec<String>,
    values: Vec<f64>,
}

impl Points {
    fn of(series: &Series) -> Self {
        let (dates, values) = series
            .iter()
            .filter_map(|(date, value)| value.map(|v| (date.to_owned(), v)))
            .unzip();
        Self { dates, values }
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn at(&self, position: usize, value: f64) -> Observation {
        Observation::present(self.dates[position].clone(), value)
    }
}

fn derived_name(function: &str, series: &Series, periods: NonZeroUsize) -> String {
    format!("{function}({},{periods})", series.name())
}

/// Rate of change in percent over `periods` observations. Points whose
/// lookback value is exactly zero are omitted.
#[must_use]
pub fn rate_of_change(series: &Series, periods: NonZeroUsize) -> Series {
    let points = Points::of(series);
    let p = periods.get();
    let name = derived_name("ROC", series, periods);
    if points.len() <= p {
        return Series::empty(name);
    }

    let observations = (p..points.len())
        .filter_map(|i| {
            let prior = points.values[i - p];
            if prior == 0.0 {
                return None;
            }
            Some(points.at(i, (points.values[i] - prior) / prior * 100.0))
        })
        .collect::<Vec<_>>();
    Series::from_observations(name, observations)
}

/// Simple moving average over a trailing window of `periods` observations.
#[must_use]
pub fn moving_average(series: &Series, periods: NonZeroUsize) -> Series {
    let points = Points::of(series);
    let p = periods.get();
    let name = derived_name("MA", series, periods);
    if points.len() < p {
        return Series::empty(name);
    }

    let observations = points
        .values
        .windows(p)
        .enumerate()
        .map(|(start, window)| {
            let average = window.iter().sum::<f64>() / p as f64;
            points.at(start + p - 1, average)
        })
        .collect::<Vec<_>>();
    Series::from_observations(name, observations)
}

/// Relative Strength Index with simple averaging: each window of `periods`
/// changes is averaged from scratch, without Wilder smoothing.
#[must_use]
pub fn relative_strength_index(series: &Series, periods: NonZeroUsize) -> Series {
    let points = Points::of(series);
    let p = periods.get();
    let name = derived_name("RSI", series, periods);
    if points.len() <= p {
        return Series::empty(name);
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = points
        .values
        .windows(2)
        .map(|pair| {
            let change = pair[1] - pair[0];
            (change.max(0.0), (-change).max(0.0))
        })
        .unzip();

    let observations = (p - 1..gains.len())
        .map(|i| {
            let window = i + 1 - p..=i;
            let avg_gain = gains[window.clone()].iter().sum::<f64>() / p as f64;
            let avg_loss = losses[window].iter().sum::<f64>() / p as f64;
            let rsi = if avg_loss == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
            };
            // change i spans observations i and i+1
            points.at(i + 1, rsi)
        })
        .collect::<Vec<_>>();
    Series::from_observations(name, observations)
}

/// Absolute change over `periods` observations.
#[must_use]
pub fn momentum(series: &Series, periods: NonZeroUsize) -> Series {
    let points = Points::of(series);
    let p = periods.get();
    let name = derived_name("MOMENTUM", series, periods);
    if points.len() <= p {
        return Series::empty(name);
    }

    let observations = (p..points.len())
        .map(|i| points.at(i, points.values[i] - points.values[i - p]))
        .collect::<Vec<_>>();
    Series::from_observations(name, observations)
}

// ── Statistics ──────────────────────────────────────────────────────────

/// Pearson correlation of two series aligned by trailing position: both
/// value lists are cut to their last `min(len_a, len_b)` entries, dates are
/// not consulted. Fewer than two pairs, or a zero-variance side, yield `0.0`.
#[must_use]
pub fn correlation(left: &Series, right: &Series) -> f64 {
    let xs = left.numeric_values();
    let ys = right.numeric_values();
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let xs = &xs[xs.len() - n..];
    let ys = &ys[ys.len() - n..];

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut sum_sq_x = 0.0;
    let mut sum_sq_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        numerator += dx * dy;
        sum_sq_x += dx * dx;
        sum_sq_y += dy * dy;
    }

    let denominator = (sum_sq_x * sum_sq_y).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    numerator / denominator
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    #[must_use]
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Ordinary least squares of `values` against the step index `x = 1..=n`.
#[must_use]
pub fn fit_linear(values: &[f64]) -> Option<LinearFit> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (step, y) in values.iter().enumerate() {
        let x = (step + 1) as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let slope = (n_f * sum_xy - sum_x * sum_y) / (n_f * sum_xx - sum_x * sum_x);
    let intercept = (sum_y - slope * sum_x) / n_f;
    Some(LinearFit { slope, intercept })
}

/// Fitted trend line of the series: one value per present observation,
/// `slope * x + intercept` at step `x`, dated like the observation at `x - 1`.
#[must_use]
pub fn linear_regression(series: &Series) -> Series {
    let points = Points::of(series);
    let name = format!("REGRESSION({})", series.name());
    let Some(fit) = fit_linear(&points.values) else {
        return Series::empty(name);
    };

    let observations = (0..points.len())
        .map(|step| points.at(step, fit.predict((step + 1) as f64)))
        .collect::<Vec<_>>();
    Series::from_observations(name, observations)
}
