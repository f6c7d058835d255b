use crate::error::BackendError::InvalidPercentile;
use crate::error::BackendResult;
use std::collections::BTreeMap;

/// Flat key/value map sent to the trap, e.g. `"api.latency.timer.mean" -> 12.5`.
pub type StatsMap = BTreeMap<String, f64>;

/// Percentile thresholds keyed by the label used in the emitted key suffix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PercentileThresholds {
    thresholds: BTreeMap<String, f64>,
}

impl PercentileThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build thresholds from bare percentile values, labelled by [`percentile_label`].
    pub fn from_percentiles(percentiles: &[f64]) -> BackendResult<Self> {
        let mut thresholds = Self::new();
        for pct in percentiles {
            thresholds.insert(percentile_label(*pct), *pct)?;
        }
        Ok(thresholds)
    }

    pub fn insert(
        &mut self,
        label: impl Into<String>,
        pct: f64,
    ) -> BackendResult<()> {
        if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
            return Err(InvalidPercentile(pct));
        }
        self.thresholds.insert(label.into(), pct);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.thresholds
            .iter()
            .map(|(label, pct)| (label.as_str(), *pct))
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

/// `90` -> `"90"`, `99.9` -> `"99_9"`, so labels never add a path segment to the key.
pub fn percentile_label(pct: f64) -> String {
    pct.to_string().replace('.', "_")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdStats {
    pub label: String,
    pub mean: f64,
    pub upper: f64,
    pub sum: f64,
}

/// Statistics derived from one metric's samples for a single flush.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerStats {
    pub count: usize,
    pub lower: f64,
    pub upper: f64,
    pub sum: f64,
    pub mean: f64,
    pub std: f64,
    pub thresholds: Vec<ThresholdStats>,
}

impl TimerStats {
    /// Write the `<name>.timer.*` keys into `stats`.
    pub fn write_into(
        &self,
        name: &str,
        stats: &mut StatsMap,
    ) {
        for threshold in &self.thresholds {
            let label = &threshold.label;
            stats.insert(format!("{name}.timer.mean.{label}"), threshold.mean);
            stats.insert(format!("{name}.timer.upper.{label}"), threshold.upper);
            stats.insert(format!("{name}.timer.sum.{label}"), threshold.sum);
        }
        stats.insert(format!("{name}.timer.std"), self.std);
        stats.insert(format!("{name}.timer.upper"), self.upper);
        stats.insert(format!("{name}.timer.lower"), self.lower);
        stats.insert(format!("{name}.timer.count"), self.count as f64);
        stats.insert(format!("{name}.timer.sum"), self.sum);
        stats.insert(format!("{name}.timer.mean"), self.mean);
    }
}

/// Turns a batch of timer samples into mean/upper/sum per percentile threshold
/// plus overall count, bounds, sum, mean and population standard deviation.
///
/// Each threshold covers the top `n` samples of the sorted batch, where
/// `n = count - round((100 - pct) / 100 * count)` clamped to `[1, count]`.
#[derive(Debug, Clone, Copy)]
pub struct TimerStatsAggregator<'a> {
    thresholds: &'a PercentileThresholds,
}

impl<'a> TimerStatsAggregator<'a> {
    pub fn new(thresholds: &'a PercentileThresholds) -> Self {
        Self { thresholds }
    }

    /// Returns `None` for an empty batch; there is nothing to report for it.
    ///
    /// NaN and infinite samples are dropped first, so a batch holding only those
    /// is treated as empty.
    pub fn aggregate(
        &self,
        samples: &[f64],
    ) -> Option<TimerStats> {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let lower = sorted[0];
        let upper = sorted[count - 1];

        // running sums from the top: cumulative[i] is the sum of sorted[i..]
        let mut cumulative = vec![0.0; count];
        let mut running = 0.0;
        for (i, value) in sorted.iter().enumerate().rev() {
            running += value;
            cumulative[i] = running;
        }
        let sum = cumulative[0];
        // float drift can push sum / count a few ulps past the bounds
        let mean = (sum / count as f64).clamp(lower, upper);

        let thresholds = self
            .thresholds
            .iter()
            .map(|(label, pct)| {
                if count == 1 {
                    return ThresholdStats {
                        label: label.to_string(),
                        mean: lower,
                        upper: lower,
                        sum: lower,
                    };
                }
                let in_threshold = tail_len(count, pct);
                let first = count - in_threshold;
                let tail_sum = cumulative[first];
                ThresholdStats {
                    label: label.to_string(),
                    mean: (tail_sum / in_threshold as f64).clamp(sorted[first], upper),
                    upper,
                    sum: tail_sum,
                }
            })
            .collect();

        let sum_of_diffs: f64 = sorted.iter().map(|value| (value - mean).powi(2)).sum();
        let std = (sum_of_diffs / count as f64).sqrt();

        Some(TimerStats {
            count,
            lower,
            upper,
            sum,
            mean,
            std,
            thresholds,
        })
    }

    /// Add the timer keys for `name` to `stats`; returns whether anything was written.
    pub fn extend_fragment(
        &self,
        name: &str,
        samples: &[f64],
        stats: &mut StatsMap,
    ) -> bool {
        match self.aggregate(samples) {
            Some(timer_stats) => {
                timer_stats.write_into(name, stats);
                true
            }
            None => false,
        }
    }

    pub fn compute_fragment(
        &self,
        name: &str,
        samples: &[f64],
    ) -> StatsMap {
        let mut stats = StatsMap::new();
        self.extend_fragment(name, samples, &mut stats);
        stats
    }
}

/// Number of samples in the tail selected by `pct`, never zero and never above `count`.
pub(crate) fn tail_len(
    count: usize,
    pct: f64,
) -> usize {
    let threshold_index = (((100.0 - pct) / 100.0) * count as f64).round();
    let threshold_index = if threshold_index > 0.0 {
        threshold_index as usize
    } else {
        0
    };
    count.saturating_sub(threshold_index).clamp(1, count)
}
