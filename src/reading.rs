//! Metric readings and their `put` line encoding.

use std::fmt;

use chrono::Utc;

/// Numeric value carried by a reading.
///
/// Each variant keeps the caller's numeric type so it renders with that
/// type's own `Display`; an `f32` is never widened before formatting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Float32(f32),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Uint(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Float32(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! value_from {
    ($variant:ident as $target:ty: $($ty:ty),+) => {
        $(
            impl From<$ty> for MetricValue {
                fn from(value: $ty) -> Self {
                    MetricValue::$variant(<$target>::from(value))
                }
            }
        )+
    };
}

value_from!(Int as i64: i8, i16, i32, i64);
value_from!(Uint as u64: u8, u16, u32, u64);
value_from!(Float as f64: f64);
value_from!(Float32 as f32: f32);

impl From<usize> for MetricValue {
    fn from(value: usize) -> Self {
        u64::try_from(value).map_or(MetricValue::Float(value as f64), MetricValue::Uint)
    }
}

impl From<isize> for MetricValue {
    fn from(value: isize) -> Self {
        i64::try_from(value).map_or(MetricValue::Float(value as f64), MetricValue::Int)
    }
}

/// A single `(host, name, value, timestamp)` tuple delivered by the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricReading {
    pub host: String,
    pub name: String,
    pub value: MetricValue,
    /// Measurement time in whole seconds since the UNIX epoch.
    pub timestamp: i64,
}

impl MetricReading {
    pub fn new(
        host: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<MetricValue>,
        timestamp: i64,
    ) -> Self {
        Self {
            host: host.into(),
            name: name.into(),
            value: value.into(),
            timestamp,
        }
    }

    /// Create a reading stamped with the current wall-clock time.
    pub fn now(
        host: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<MetricValue>,
    ) -> Self {
        Self::new(host, name, value, Utc::now().timestamp())
    }
}

/// Join tag tokens into the suffix appended to every message.
pub fn join_tags<I, S>(tags: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().to_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Encode a `put` command line.
///
/// An empty tag string omits the separating space, so the line always ends
/// in either the value or the last tag followed by `\n`.
pub fn format_put(statname: &str, timestamp: i64, value: MetricValue, tags: &str) -> String {
    if tags.is_empty() {
        format!("put {statname} {timestamp} {value}\n")
    } else {
        format!("put {statname} {timestamp} {value} {tags}\n")
    }
}
