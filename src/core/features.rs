//! Feature computation from the accepted event stream.
//!
//! All features are computed from timing and key codes only. Synthetic
//! key events never contribute a dwell or flight sample.

use crate::collector::types::{CapturedEvent, KeyKind};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;

/// Tunables for feature extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// A key is "fast" when both dwell and flight are below this
    pub burst_threshold_ms: f64,
    /// Minimum consecutive fast keys for a burst
    pub burst_min_run: usize,
    /// Dwell samples above this are discarded as stuck keys
    pub max_dwell_ms: f64,
    /// Flight samples above this are discarded as breaks
    pub max_flight_ms: f64,
    /// Flights longer than this count as pauses
    pub pause_threshold_ms: f64,
    /// Flights shorter than this count toward the model's burst_count
    pub fast_flight_ms: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            burst_threshold_ms: 8.0,
            burst_min_run: 5,
            max_dwell_ms: 2000.0,
            max_flight_ms: 5000.0,
            pause_threshold_ms: 500.0,
            fast_flight_ms: 50.0,
        }
    }
}

/// Timing of one genuine key press.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyTiming {
    pub code: u32,
    /// Release minus press; `None` when no release was observed
    pub dwell: Option<f64>,
    /// Press minus the preceding release; `None` for the first press
    pub flight: Option<f64>,
}

/// Runs of consecutive keys typed faster than a person can.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstReport {
    pub has_burst: bool,
    pub run_count: usize,
    /// Index (into the key timings) where each counted run starts
    pub run_starts: Vec<usize>,
    pub covered_keys: usize,
    pub total_keys: usize,
    /// Longest fast streak, counted or not
    pub max_run_length: usize,
    /// `covered_keys / total_keys`
    pub severity: f64,
}

/// Fixed-width bucket counts for the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingHistograms {
    pub dwell: Vec<u32>,
    pub flight: Vec<u32>,
}

pub const HISTOGRAM_BUCKETS: usize = 10;
pub const DWELL_BUCKET_MS: f64 = 20.0;
pub const FLIGHT_BUCKET_MS: f64 = 30.0;

/// Names of the model feature vector, in the order the model expects.
pub const MODEL_FEATURE_NAMES: [&str; 21] = [
    "total_keystrokes",
    "duration_ms",
    "avg_dwell_time",
    "std_dwell_time",
    "min_dwell_time",
    "max_dwell_time",
    "avg_flight_time",
    "std_flight_time",
    "min_flight_time",
    "max_flight_time",
    "zero_dwell_ratio",
    "zero_flight_ratio",
    "pause_count",
    "pause_ratio",
    "backspace_ratio",
    "tab_ratio",
    "ctrl_ratio",
    "symbol_ratio",
    "long_pause_count",
    "avg_long_pause",
    "burst_count",
];

/// Inputs handed to an external classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelFeatures {
    pub total_keystrokes: f64,
    pub duration_ms: f64,
    pub avg_dwell_time: f64,
    pub std_dwell_time: f64,
    pub min_dwell_time: f64,
    pub max_dwell_time: f64,
    pub avg_flight_time: f64,
    pub std_flight_time: f64,
    pub min_flight_time: f64,
    pub max_flight_time: f64,
    pub zero_dwell_ratio: f64,
    pub zero_flight_ratio: f64,
    pub pause_count: f64,
    pub pause_ratio: f64,
    pub backspace_ratio: f64,
    pub tab_ratio: f64,
    pub ctrl_ratio: f64,
    pub symbol_ratio: f64,
    pub long_pause_count: f64,
    pub avg_long_pause: f64,
    pub burst_count: f64,
}

impl ModelFeatures {
    /// The vector in [`MODEL_FEATURE_NAMES`] order.
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.total_keystrokes,
            self.duration_ms,
            self.avg_dwell_time,
            self.std_dwell_time,
            self.min_dwell_time,
            self.max_dwell_time,
            self.avg_flight_time,
            self.std_flight_time,
            self.min_flight_time,
            self.max_flight_time,
            self.zero_dwell_ratio,
            self.zero_flight_ratio,
            self.pause_count,
            self.pause_ratio,
            self.backspace_ratio,
            self.tab_ratio,
            self.ctrl_ratio,
            self.symbol_ratio,
            self.long_pause_count,
            self.avg_long_pause,
            self.burst_count,
        ]
    }
}

/// Everything derived from a session's events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Genuine key presses
    pub keystrokes: usize,
    pub dwell_times: Vec<f64>,
    pub flight_times: Vec<f64>,
    pub dwell_avg: f64,
    pub flight_avg: f64,
    pub wpm: f64,
    /// Session start to last event
    pub elapsed_ms: f64,
    pub burst: BurstReport,
    pub timings: Vec<KeyTiming>,
    press_codes: Vec<u32>,
}

impl FeatureSet {
    /// Extract features from events sorted by timestamp.
    ///
    /// `session_start_ms` is the capture-clock time recording started; when
    /// unknown, the first event stands in for it.
    pub fn extract(events: &[CapturedEvent], session_start_ms: Option<f64>, config: &FeatureConfig) -> Self {
        let timings = key_timings(events, config);
        let press_codes: Vec<u32> = timings.iter().map(|t| t.code).collect();
        let dwell_times: Vec<f64> = timings.iter().filter_map(|t| t.dwell).collect();
        let flight_times: Vec<f64> = timings.iter().filter_map(|t| t.flight).collect();

        let first_ts = events.first().map(CapturedEvent::timestamp);
        let last_ts = events.last().map(CapturedEvent::timestamp);
        let elapsed_ms = match (session_start_ms.or(first_ts), last_ts) {
            (Some(start), Some(end)) => (end - start).max(0.0),
            _ => 0.0,
        };

        let keystrokes = timings.len();
        Self {
            keystrokes,
            dwell_avg: mean_or_zero(&dwell_times),
            flight_avg: mean_or_zero(&flight_times),
            wpm: words_per_minute(keystrokes, elapsed_ms),
            elapsed_ms,
            burst: detect_bursts(&timings, config),
            dwell_times,
            flight_times,
            timings,
            press_codes,
        }
    }

    pub fn histograms(&self) -> TimingHistograms {
        TimingHistograms {
            dwell: histogram(&self.dwell_times, DWELL_BUCKET_MS),
            flight: histogram(&self.flight_times, FLIGHT_BUCKET_MS),
        }
    }

    /// The 21-entry vector consumed by external classifiers.
    pub fn model_features(&self, config: &FeatureConfig) -> ModelFeatures {
        let positive_dwell: Vec<f64> = self.dwell_times.iter().copied().filter(|&d| d > 0.0).collect();
        let positive_flight: Vec<f64> = self.flight_times.iter().copied().filter(|&f| f > 0.0).collect();
        let dwell = SampleStats::of(&positive_dwell);
        let flight = SampleStats::of(&positive_flight);

        let pauses: Vec<f64> = self
            .flight_times
            .iter()
            .copied()
            .filter(|&f| f > config.pause_threshold_ms)
            .collect();

        ModelFeatures {
            total_keystrokes: self.dwell_times.len() as f64,
            duration_ms: self.dwell_times.iter().sum::<f64>() + self.flight_times.iter().sum::<f64>(),
            avg_dwell_time: dwell.mean,
            std_dwell_time: dwell.std_dev,
            min_dwell_time: dwell.min,
            max_dwell_time: dwell.max,
            avg_flight_time: flight.mean,
            std_flight_time: flight.std_dev,
            min_flight_time: flight.min,
            max_flight_time: flight.max,
            zero_dwell_ratio: fraction(&self.dwell_times, |d| d == 0.0),
            zero_flight_ratio: fraction(&self.flight_times, |f| f == 0.0),
            pause_count: pauses.len() as f64,
            pause_ratio: ratio(pauses.len(), self.flight_times.len()),
            backspace_ratio: self.code_ratio(|c| c == 8),
            tab_ratio: self.code_ratio(|c| c == 9),
            ctrl_ratio: self.code_ratio(|c| c == 17),
            symbol_ratio: self.code_ratio(|c| (33..=47).contains(&c) || (58..=64).contains(&c)),
            long_pause_count: pauses.len() as f64,
            avg_long_pause: mean_or_zero(&pauses),
            burst_count: count_fast_flight_runs(&self.flight_times, config.fast_flight_ms) as f64,
        }
    }

    fn code_ratio(&self, pred: impl Fn(u32) -> bool) -> f64 {
        let hits = self.press_codes.iter().filter(|&&c| pred(c)).count();
        ratio(hits, self.press_codes.len())
    }
}

/// Pair presses with releases and derive dwell/flight per press.
///
/// A release closes the most recent open press of the same code. Samples
/// outside the configured bounds are dropped rather than clamped.
pub fn key_timings(events: &[CapturedEvent], config: &FeatureConfig) -> Vec<KeyTiming> {
    let mut timings: Vec<KeyTiming> = Vec::new();
    let mut open: HashMap<u32, (usize, f64)> = HashMap::new();
    let mut last_release: Option<f64> = None;

    for key in events
        .iter()
        .filter_map(CapturedEvent::as_keystroke)
        .filter(|k| k.is_genuine())
    {
        match key.kind {
            KeyKind::Press => {
                let flight = last_release
                    .map(|release| key.timestamp - release)
                    .filter(|f| (0.0..=config.max_flight_ms).contains(f));
                open.insert(key.code, (timings.len(), key.timestamp));
                timings.push(KeyTiming {
                    code: key.code,
                    dwell: None,
                    flight,
                });
            }
            KeyKind::Release => {
                if let Some((index, pressed_at)) = open.remove(&key.code) {
                    let dwell = key.timestamp - pressed_at;
                    if (0.0..=config.max_dwell_ms).contains(&dwell) {
                        timings[index].dwell = Some(dwell);
                    }
                }
                last_release = Some(key.timestamp);
            }
        }
    }

    timings
}

/// Find runs of at least `burst_min_run` keys whose dwell and flight are
/// both under `burst_threshold_ms`.
///
/// A run is counted once when it reaches the minimum length and keeps
/// growing until a slow key breaks it; a key missing either sample breaks
/// the run.
pub fn detect_bursts(timings: &[KeyTiming], config: &FeatureConfig) -> BurstReport {
    let threshold = config.burst_threshold_ms;
    let min_run = config.burst_min_run.max(1);

    let mut run_len = 0usize;
    let mut run_start = 0usize;
    let mut run_starts = Vec::new();
    let mut covered_keys = 0usize;
    let mut max_run_length = 0usize;

    for (i, timing) in timings.iter().enumerate() {
        let fast = matches!(
            (timing.dwell, timing.flight),
            (Some(d), Some(f)) if d < threshold && f < threshold
        );
        if fast {
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len == min_run {
                run_starts.push(run_start);
                covered_keys += min_run;
            } else if run_len > min_run {
                covered_keys += 1;
            }
        } else {
            max_run_length = max_run_length.max(run_len);
            run_len = 0;
        }
    }
    max_run_length = max_run_length.max(run_len);

    let total_keys = timings.len();
    BurstReport {
        has_burst: !run_starts.is_empty(),
        run_count: run_starts.len(),
        run_starts,
        covered_keys,
        total_keys,
        max_run_length,
        severity: ratio(covered_keys, total_keys),
    }
}

/// Words per minute at five characters per word. Zero when no time elapsed.
pub fn words_per_minute(presses: usize, elapsed_ms: f64) -> f64 {
    if elapsed_ms <= 0.0 {
        return 0.0;
    }
    (presses as f64 / 5.0) / (elapsed_ms / 60_000.0)
}

/// Ten fixed-width buckets; out-of-range samples land in the edge buckets.
pub fn histogram(samples: &[f64], bucket_ms: f64) -> Vec<u32> {
    let mut counts = vec![0u32; HISTOGRAM_BUCKETS];
    for &sample in samples {
        let index = if sample <= 0.0 {
            0
        } else {
            ((sample / bucket_ms) as usize).min(HISTOGRAM_BUCKETS - 1)
        };
        counts[index] += 1;
    }
    counts
}

fn count_fast_flight_runs(flights: &[f64], fast_ms: f64) -> usize {
    let mut runs = 0;
    let mut in_run = false;
    for &flight in flights {
        let fast = flight < fast_ms;
        if fast && !in_run {
            runs += 1;
        }
        in_run = fast;
    }
    runs
}

#[derive(Debug, Default)]
struct SampleStats {
    mean: f64,
    std_dev: f64,
    min: f64,
    max: f64,
}

impl SampleStats {
    fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            mean: values.iter().mean(),
            std_dev: if values.len() < 2 {
                0.0
            } else {
                values.iter().population_std_dev()
            },
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().mean()
    }
}

fn fraction(values: &[f64], pred: impl Fn(f64) -> bool) -> f64 {
    ratio(values.iter().filter(|&&v| pred(v)).count(), values.len())
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
