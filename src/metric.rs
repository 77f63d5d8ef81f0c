//! Metric records shared by the agent and the collector
//!
//! A record is identified by `(id, kind)`. Counters carry a `delta` that is
//! summed into the stored total, gauges carry a `value` that replaces the
//! stored one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of a metric, serialized as `"counter"` / `"gauge"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically accumulating metric
    Counter,

    /// Point-in-time metric, last write wins
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// A record violates the field rules for its kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("metric id must not be empty")]
    EmptyId,

    #[error("counter {0} has no delta")]
    MissingDelta(String),

    #[error("counter {0} must not carry a value")]
    UnexpectedValue(String),

    #[error("gauge {0} has no value")]
    MissingValue(String),

    #[error("gauge {0} must not carry a delta")]
    UnexpectedDelta(String),

    #[error("gauge {0} must be a finite number")]
    NonFiniteValue(String),

    #[error("unknown metric type: {0}")]
    UnknownKind(String),
}

/// Wire representation of a single metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MetricKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricRecord {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    /// Check that exactly the field belonging to the record's kind is set
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }

        match self.kind {
            MetricKind::Counter => {
                if self.delta.is_none() {
                    return Err(ValidationError::MissingDelta(self.id.clone()));
                }
                if self.value.is_some() {
                    return Err(ValidationError::UnexpectedValue(self.id.clone()));
                }
            }
            MetricKind::Gauge => {
                let Some(value) = self.value else {
                    return Err(ValidationError::MissingValue(self.id.clone()));
                };
                if self.delta.is_some() {
                    return Err(ValidationError::UnexpectedDelta(self.id.clone()));
                }
                // serde_json writes NaN and infinities as null
                if !value.is_finite() {
                    return Err(ValidationError::NonFiniteValue(self.id.clone()));
                }
            }
        }

        Ok(())
    }

    /// Human readable value: counters as integers, gauges as decimals
    pub fn formatted_value(&self) -> Option<String> {
        match self.kind {
            MetricKind::Counter => self.delta.map(format_counter),
            MetricKind::Gauge => self.value.map(format_gauge),
        }
    }
}

/// Apply an incoming counter increment to a stored total
pub fn accumulate(stored: i64, incoming: i64) -> i64 {
    stored.saturating_add(incoming)
}

pub fn format_counter(delta: i64) -> String {
    delta.to_string()
}

/// Shortest decimal representation that round-trips (`2.0` → `"2"`)
pub fn format_gauge(value: f64) -> String {
    value.to_string()
}
