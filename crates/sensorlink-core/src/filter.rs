//! Signal filter stage.
//!
//! A [`ValueFilter`] maps `(timestamp, value)` to a new value. Filters compose
//! left to right with [`ValueFilter::then`] or a [`FilterChain`]. Invalid
//! parameters are rejected when a filter is constructed, never while it runs.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid filter parameters.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum FilterError {
    /// The source range of a scale has zero width.
    #[error("degenerate scale range: bottom and top are both {0}")]
    DegenerateRange(f64),

    /// A scale bound is NaN or infinite.
    #[error("scale bound {0} is not finite")]
    NonFiniteBound(f64),

    /// A frequency window must be positive.
    #[error("frequency window must be positive, got {0} ms")]
    InvalidWindow(i64),

    /// Text could not be parsed as a filter parameter.
    #[error("invalid filter parameter: {0}")]
    Parse(String),
}

/// A `(timestamp, value) -> value` transform.
///
/// Implementations may keep internal state (e.g. a sliding window), so
/// filtering takes `&mut self`.
pub trait ValueFilter: Send {
    fn filter(&mut self, timestamp_millis: i64, value: f64) -> f64;

    /// Feed this filter's output into `next`.
    fn then<G>(self, next: G) -> Compose<Self, G>
    where
        Self: Sized,
        G: ValueFilter,
    {
        compose(self, next)
    }
}

impl<F: ValueFilter + ?Sized> ValueFilter for Box<F> {
    fn filter(&mut self, timestamp_millis: i64, value: f64) -> f64 {
        (**self).filter(timestamp_millis, value)
    }
}

/// Passes values through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl ValueFilter for Identity {
    fn filter(&mut self, _timestamp_millis: i64, value: f64) -> f64 {
        value
    }
}

/// `g(t, f(t, v))`.
#[derive(Debug, Clone)]
pub struct Compose<F, G> {
    first: F,
    second: G,
}

/// Compose two filters; `first` runs before `second`.
pub fn compose<F: ValueFilter, G: ValueFilter>(first: F, second: G) -> Compose<F, G> {
    Compose { first, second }
}

impl<F: ValueFilter, G: ValueFilter> ValueFilter for Compose<F, G> {
    fn filter(&mut self, timestamp_millis: i64, value: f64) -> f64 {
        let intermediate = self.first.filter(timestamp_millis, value);
        self.second.filter(timestamp_millis, intermediate)
    }
}

/// A runtime-assembled sequence of filters, applied in insertion order.
///
/// An empty chain is the identity.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn ValueFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the end of the chain.
    pub fn push(&mut self, filter: impl ValueFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl ValueFilter for FilterChain {
    fn filter(&mut self, timestamp_millis: i64, value: f64) -> f64 {
        self.filters
            .iter_mut()
            .fold(value, |v, f| f.filter(timestamp_millis, v))
    }
}

/// A closed interval `[bottom, top]` used by [`ScaleFilter`].
///
/// `bottom` may be greater than `top` to invert the axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRange {
    pub bottom: f64,
    pub top: f64,
}

impl ScaleRange {
    pub fn new(bottom: f64, top: f64) -> Self {
        Self { bottom, top }
    }

    fn check_finite(&self) -> Result<(), FilterError> {
        for bound in [self.bottom, self.top] {
            if !bound.is_finite() {
                return Err(FilterError::NonFiniteBound(bound));
            }
        }
        Ok(())
    }
}

/// Linear map from one range onto another.
///
/// ```
/// use sensorlink_core::filter::{ScaleFilter, ScaleRange, ValueFilter};
///
/// // 0..1023 ADC counts to 0..5 volts
/// let mut volts = ScaleFilter::new(ScaleRange::new(0.0, 1023.0), ScaleRange::new(0.0, 5.0)).unwrap();
/// assert_eq!(volts.filter(0, 1023.0), 5.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFilter {
    source: ScaleRange,
    dest: ScaleRange,
}

impl ScaleFilter {
    /// Create a scale. Rejects a zero-width source range and non-finite bounds.
    pub fn new(source: ScaleRange, dest: ScaleRange) -> Result<Self, FilterError> {
        source.check_finite()?;
        dest.check_finite()?;
        if source.bottom == source.top {
            return Err(FilterError::DegenerateRange(source.bottom));
        }
        Ok(Self { source, dest })
    }

    /// The scale mapping `dest` back onto `source`.
    pub fn inverse(&self) -> Result<Self, FilterError> {
        Self::new(self.dest, self.source)
    }

    pub fn apply(&self, value: f64) -> f64 {
        (value - self.source.bottom) / (self.source.top - self.source.bottom)
            * (self.dest.top - self.dest.bottom)
            + self.dest.bottom
    }
}

impl ValueFilter for ScaleFilter {
    fn filter(&mut self, _timestamp_millis: i64, value: f64) -> f64 {
        self.apply(value)
    }
}

/// Time unit of a [`FrequencyFilter`] result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyUnit {
    /// Cycles per second.
    #[default]
    Hertz,
    /// Cycles per minute (RPM, BPM).
    PerMinute,
}

impl FrequencyUnit {
    /// Milliseconds per unit of time.
    pub fn millis(&self) -> f64 {
        match self {
            FrequencyUnit::Hertz => 1_000.0,
            FrequencyUnit::PerMinute => 60_000.0,
        }
    }
}

impl FromStr for FrequencyUnit {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hz" | "hertz" => Ok(FrequencyUnit::Hertz),
            "rpm" | "bpm" | "perminute" | "per_minute" => Ok(FrequencyUnit::PerMinute),
            _ => Err(FilterError::Parse(format!("unknown frequency unit '{s}'"))),
        }
    }
}

/// Estimates the frequency of a signal from threshold crossings.
///
/// Samples are kept for a trailing window. Each new sample recomputes the
/// threshold as the window mean plus a noise floor, counts how often the
/// signal crosses it, and returns half the crossing count divided by the time
/// spanned by the crossings. The first crossing only marks the start of that
/// span and is not counted.
///
/// Returns 0 with fewer than two samples, and when the crossings span less
/// than a quarter of the window, so a signal that just stopped reads as
/// stopped.
#[derive(Debug, Clone)]
pub struct FrequencyFilter {
    window_millis: i64,
    noise_floor: f64,
    unit: FrequencyUnit,
    samples: VecDeque<(i64, f64)>,
}

impl FrequencyFilter {
    pub fn new(
        window_millis: i64,
        noise_floor: f64,
        unit: FrequencyUnit,
    ) -> Result<Self, FilterError> {
        if window_millis <= 0 {
            return Err(FilterError::InvalidWindow(window_millis));
        }
        if !noise_floor.is_finite() {
            return Err(FilterError::NonFiniteBound(noise_floor));
        }
        Ok(Self {
            window_millis,
            noise_floor,
            unit,
            samples: VecDeque::new(),
        })
    }

    pub fn window_millis(&self) -> i64 {
        self.window_millis
    }

    /// Number of samples currently in the window.
    pub fn buffered(&self) -> usize {
        self.samples.len()
    }

    fn estimate(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }

        let sum: f64 = self.samples.iter().map(|&(_, v)| v).sum();
        let threshold = sum / self.samples.len() as f64 + self.noise_floor;

        let mut above = self.samples[0].1 > threshold;
        let mut first_crossing = None;
        let mut last_crossing = 0;
        let mut crossings = 0u32;
        for &(timestamp, value) in self.samples.iter().skip(1) {
            let now_above = value > threshold;
            if now_above == above {
                continue;
            }
            above = now_above;
            if first_crossing.is_none() {
                first_crossing = Some(timestamp);
            } else {
                crossings += 1;
            }
            last_crossing = timestamp;
        }

        let Some(first_crossing) = first_crossing else {
            return 0.0;
        };
        let elapsed = (last_crossing - first_crossing) as f64;
        if elapsed < self.window_millis as f64 / 4.0 {
            return 0.0;
        }
        (f64::from(crossings) / 2.0) / (elapsed / self.unit.millis())
    }
}

impl ValueFilter for FrequencyFilter {
    fn filter(&mut self, timestamp_millis: i64, value: f64) -> f64 {
        self.samples.push_back((timestamp_millis, value));
        let oldest = timestamp_millis.saturating_sub(self.window_millis);
        while let Some(&(ts, _)) = self.samples.front() {
            if ts >= oldest {
                break;
            }
            self.samples.pop_front();
        }
        self.estimate()
    }
}

/// Linear scale parameters, as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleConfig {
    pub source_bottom: f64,
    pub source_top: f64,
    pub dest_bottom: f64,
    pub dest_top: f64,
}

impl ScaleConfig {
    pub fn build(&self) -> Result<ScaleFilter, FilterError> {
        ScaleFilter::new(
            ScaleRange::new(self.source_bottom, self.source_top),
            ScaleRange::new(self.dest_bottom, self.dest_top),
        )
    }
}

/// Parses `source_bottom:source_top:dest_bottom:dest_top`.
impl FromStr for ScaleConfig {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(':')
            .map(|p| {
                p.trim()
                    .parse::<f64>()
                    .map_err(|_| FilterError::Parse(format!("'{p}' is not a number")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let [source_bottom, source_top, dest_bottom, dest_top] = parts[..] else {
            return Err(FilterError::Parse(format!(
                "expected 4 values separated by ':', got '{s}'"
            )));
        };
        Ok(Self {
            source_bottom,
            source_top,
            dest_bottom,
            dest_top,
        })
    }
}

/// Frequency extraction parameters, as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyConfig {
    pub window_millis: i64,
    #[serde(default)]
    pub noise_floor: f64,
    #[serde(default)]
    pub unit: FrequencyUnit,
}

/// Declarative description of a filter chain.
///
/// Frequency extraction runs first, so a scale applies to the extracted
/// frequency. Without either the chain is the identity.
///
/// ```
/// use sensorlink_core::filter::{FilterConfig, ValueFilter};
///
/// let config: FilterConfig = serde_json::from_str(
///     r#"{"scale": {"source_bottom": 0, "source_top": 100, "dest_bottom": 0, "dest_top": 1}}"#,
/// ).unwrap();
/// let mut chain = config.build().unwrap();
/// assert_eq!(chain.filter(0, 50.0), 0.5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub frequency: Option<FrequencyConfig>,
    pub scale: Option<ScaleConfig>,
}

impl FilterConfig {
    /// Assemble the chain, rejecting degenerate parameters.
    pub fn build(&self) -> Result<FilterChain, FilterError> {
        let mut chain = FilterChain::new();
        if let Some(frequency) = &self.frequency {
            chain.push(FrequencyFilter::new(
                frequency.window_millis,
                frequency.noise_floor,
                frequency.unit,
            )?);
        }
        if let Some(scale) = &self.scale {
            chain.push(scale.build()?);
        }
        Ok(chain)
    }
}
