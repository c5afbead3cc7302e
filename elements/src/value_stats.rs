// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use medians::Medianf64;
use rolling_stats;
use statistical;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DescriptiveStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,

    // Only computed over the recent window.
    pub median: Option<f64>,
    pub median_absolute_deviation: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueStats {
    // Over the most recent `capacity` values.
    pub recent: DescriptiveStats,

    // Over all values since construction or the last reset_session().
    pub session: DescriptiveStats,

    // Number of values added this session.
    pub session_count: usize,
}

// Summarizes a stream of scalar values, e.g. analyzer outputs or control
// tick latencies. Non-finite values are ignored.
pub struct ValueStatsAccumulator {
    value_stats: ValueStats,

    // State for `recent`.
    recent_values: CircularBuffer,

    // State for `session`.
    rolling_stats: rolling_stats::Stats<f64>,
}

impl ValueStatsAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            value_stats: ValueStats::default(),
            recent_values: CircularBuffer::new(capacity),
            rolling_stats: rolling_stats::Stats::<f64>::new(),
        }
    }

    pub fn value_stats(&self) -> &ValueStats {
        &self.value_stats
    }

    pub fn add_value(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.recent_values.push(value);
        self.rolling_stats.update(value);
        self.value_stats.session_count += 1;

        let values = self.recent_values.unordered_contents();
        let recent = &mut self.value_stats.recent;
        recent.min = values.iter().copied().fold(f64::INFINITY, f64::min);
        recent.max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        recent.mean = statistical::mean(values);
        recent.stddev = if values.len() > 1 {
            statistical::standard_deviation(values, Some(recent.mean))
        } else {
            0.0
        };
        let median = values.medf_unchecked();
        recent.median = Some(median);
        recent.median_absolute_deviation = Some(values.madf(median));

        let session = &mut self.value_stats.session;
        session.min = self.rolling_stats.min;
        session.max = self.rolling_stats.max;
        session.mean = self.rolling_stats.mean;
        session.stddev = self.rolling_stats.std_dev;
    }

    pub fn reset_session(&mut self) {
        self.value_stats.session = DescriptiveStats::default();
        self.value_stats.session_count = 0;
        self.rolling_stats = rolling_stats::Stats::<f64>::new();
    }
}

// Fixed capacity ring of f64 values, viewable as a single unordered slice.
#[derive(Debug)]
struct CircularBuffer {
    start: usize,
    data: Vec<f64>,
}

impl CircularBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            start: 0,
            data: Vec::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, item: f64) {
        if self.data.len() < self.data.capacity() {
            self.data.push(item);
        } else {
            self.data[self.start] = item;
            self.start = (self.start + 1) % self.data.len();
        }
    }

    pub fn unordered_contents(&self) -> &[f64] {
        self.data.as_slice()
    }
}

// mod tests.
