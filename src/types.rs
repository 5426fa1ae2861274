//! Core value types shared by the cache, the consumers and the querier
//!
//! # Key Types
//!
//! - **`TimeRange`**: half-open millisecond window `[from, to)`
//! - **`Step`**: aggregation step duration, drives alignment rules
//! - **`RequestType`**: requested result shape
//! - **`Clock`**: source of "now" for flux-interval decisions
//!
//! # Example
//!
//! ```rust
//! use kuba_querier::types::{Step, TimeRange};
//!
//! let window = TimeRange::new(1_000, 5_000);
//! assert!(window.contains(4_999));
//! assert!(!window.contains(5_000));
//!
//! let step = Step::from_millis(1_000);
//! assert_eq!(step.align_up(1_500), 2_000);
//! assert_eq!(step.align_down(4_500), 4_000);
//! ```

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Range
// ============================================================================

/// Half-open millisecond interval `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub from: u64,
    /// End timestamp in milliseconds (exclusive)
    pub to: u64,
}

impl TimeRange {
    /// Create a new range
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Check if a timestamp falls inside `[from, to)`
    pub fn contains(&self, timestamp_ms: u64) -> bool {
        timestamp_ms >= self.from && timestamp_ms < self.to
    }

    /// Width of the range in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    /// True when the range holds no instant
    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    /// Shift both ends back by `shift_ms`, saturating at zero
    pub fn shifted_back(&self, shift_ms: u64) -> Self {
        Self {
            from: self.from.saturating_sub(shift_ms),
            to: self.to.saturating_sub(shift_ms),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

// ============================================================================
// Step
// ============================================================================

/// Requested aggregation step
///
/// Deserializes from either a number of seconds (`60`, `0.5`) or a duration
/// string (`"15s"`, `"1m"`, `"500ms"`, `"1h"`). Serializes as seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Step(pub Duration);

impl Step {
    /// Zero step: no alignment
    pub const ZERO: Step = Step(Duration::ZERO);

    /// Create a step from milliseconds
    pub fn from_millis(ms: u64) -> Self {
        Step(Duration::from_millis(ms))
    }

    /// Create a step from seconds
    pub fn from_secs(secs: u64) -> Self {
        Step(Duration::from_secs(secs))
    }

    /// Step in milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }

    /// Step in whole seconds
    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    /// True when the step is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Round `ms` up to the next step multiple (identity when aligned or step is zero)
    pub fn align_up(&self, ms: u64) -> u64 {
        let step = self.as_millis();
        if step == 0 || ms % step == 0 {
            ms
        } else {
            ms - (ms % step) + step
        }
    }

    /// Round `ms` down to the previous step multiple (identity when aligned or step is zero)
    pub fn align_down(&self, ms: u64) -> u64 {
        let step = self.as_millis();
        if step == 0 {
            ms
        } else {
            ms - (ms % step)
        }
    }

    /// Whether `ms` sits on a step boundary
    pub fn is_aligned(&self, ms: u64) -> bool {
        let step = self.as_millis();
        step == 0 || ms % step == 0
    }
}

/// Parse a duration string such as `15s`, `1m30s`, `250ms` or `2h`
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let mut total_ms: f64 = 0.0;
    let mut rest = input;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return None;
        }
        let number: f64 = rest[..num_end].parse().ok()?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let factor_ms = match &rest[..unit_end] {
            "ns" => 1e-6,
            "us" | "µs" => 1e-3,
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return None,
        };
        rest = &rest[unit_end..];
        total_ms += number * factor_ms;
    }

    Some(Duration::from_micros((total_ms * 1_000.0).round() as u64))
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0.as_secs_f64())
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StepVisitor;

        impl Visitor<'_> for StepVisitor {
            type Value = Step;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration in seconds or a duration string like \"1m\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Step, E> {
                Ok(Step(Duration::from_secs(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Step, E> {
                if v < 0 {
                    return Err(E::custom("step cannot be negative"));
                }
                Ok(Step(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Step, E> {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("step must be a non-negative number of seconds"));
                }
                Ok(Step(Duration::from_secs_f64(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Step, E> {
                parse_duration(v).map(Step).ok_or_else(|| {
                    E::custom(format!(
                        "invalid step {:?}, expected a duration string (example: 15s, 1m, 1h)",
                        v
                    ))
                })
            }
        }

        deserializer.deserialize_any(StepVisitor)
    }
}

// ============================================================================
// Request Type
// ============================================================================

/// Shape of the result a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Labeled series of timestamped points
    #[default]
    TimeSeries,
    /// One row per group with aggregation columns
    Scalar,
    /// Untransformed rows
    Raw,
    /// Trace rows (raw shape)
    Trace,
    /// Time series whose points carry histogram bins
    Heatmap,
    /// Per-timestamp buckets with bounds and counts
    Distribution,
}

impl RequestType {
    /// Whether results of this type may be written to the bucket cache
    pub fn is_cacheable(&self) -> bool {
        matches!(self, RequestType::TimeSeries | RequestType::Heatmap)
    }

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::TimeSeries => "time_series",
            RequestType::Scalar => "scalar",
            RequestType::Raw => "raw",
            RequestType::Trace => "trace",
            RequestType::Heatmap => "heatmap",
            RequestType::Distribution => "distribution",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Settable clock for deterministic flux-interval behavior
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: AtomicU64,
}

impl FixedClock {
    /// Create a clock frozen at `now_ms`
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    /// Move the clock to `now_ms`
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Advance the clock by `delta`
    pub fn advance(&self, delta: Duration) {
        self.now_ms
            .fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_half_open() {
        let range = TimeRange::new(1000, 2000);
        assert!(range.contains(1000));
        assert!(range.contains(1999));
        assert!(!range.contains(2000));
        assert_eq!(range.duration_ms(), 1000);
        assert!(TimeRange::new(5, 5).is_empty());
    }

    #[test]
    fn test_step_alignment() {
        let step = Step::from_millis(300_000);
        assert_eq!(step.align_up(720_000), 900_000);
        assert_eq!(step.align_up(900_000), 900_000);
        assert_eq!(step.align_down(3_480_000), 3_300_000);
        assert!(step.is_aligned(600_000));
        assert!(!step.is_aligned(600_001));
        assert_eq!(Step::ZERO.align_up(1234), 1234);
    }

    #[test]
    fn test_step_deserialize_forms() {
        let s: Step = serde_json::from_str("60").unwrap();
        assert_eq!(s.as_millis(), 60_000);
        let s: Step = serde_json::from_str("0.5").unwrap();
        assert_eq!(s.as_millis(), 500);
        let s: Step = serde_json::from_str("\"1m30s\"").unwrap();
        assert_eq!(s.as_millis(), 90_000);
        let s: Step = serde_json::from_str("\"250ms\"").unwrap();
        assert_eq!(s.as_millis(), 250);
        assert!(serde_json::from_str::<Step>("\"soon\"").is_err());
        assert!(serde_json::from_str::<Step>("-3").is_err());
    }

    #[test]
    fn test_step_serializes_as_seconds() {
        let json = serde_json::to_string(&Step::from_secs(90)).unwrap();
        assert_eq!(json, "90.0");
    }

    #[test]
    fn test_request_type_cacheability() {
        assert!(RequestType::TimeSeries.is_cacheable());
        assert!(RequestType::Heatmap.is_cacheable());
        assert!(!RequestType::Scalar.is_cacheable());
        assert!(!RequestType::Raw.is_cacheable());
        assert!(!RequestType::Trace.is_cacheable());
        let parsed: RequestType = serde_json::from_str("\"time_series\"").unwrap();
        assert_eq!(parsed, RequestType::TimeSeries);
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(10_000);
        assert_eq!(clock.now_ms(), 10_000);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_ms(), 11_000);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
