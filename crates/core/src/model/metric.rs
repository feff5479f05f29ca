use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// How a metric slot's 64-bit cell is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Event counts, bytes, cycles.
    #[default]
    Integer,
    /// Seconds and other floating quantities.
    Real,
}

/// Descriptor for one sampled metric column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDesc {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: MetricKind,
    /// Sampling period; each sample stands for `period` events.
    #[serde(default = "default_period")]
    pub period: u64,
}

fn default_period() -> u64 {
    1
}

impl MetricDesc {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            period: default_period(),
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Real)
    }

    pub fn is_real(&self) -> bool {
        self.kind == MetricKind::Real
    }
}

/// The read-only metric vector shared by every dynamic node of a tree.
pub type MetricDescs = Arc<[MetricDesc]>;

/// One metric cell: 64 bits read either as `u64` or as `f64`.
///
/// The slot's [`MetricKind`] decides which view arithmetic uses; the value
/// itself never records it.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricValue(u64);

impl MetricValue {
    pub const ZERO: MetricValue = MetricValue(0);

    #[inline]
    pub const fn from_int(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    pub fn from_real(v: f64) -> Self {
        Self(v.to_bits())
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn as_int(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn as_real(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Zero in both views, i.e. every bit clear. `-0.0` is not zero.
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn incr(&mut self, kind: MetricKind, by: MetricValue) {
        *self = match kind {
            MetricKind::Real => Self::from_real(self.as_real() + by.as_real()),
            MetricKind::Integer => Self(self.0.wrapping_add(by.0)),
        };
    }

    pub fn decr(&mut self, kind: MetricKind, by: MetricValue) {
        *self = match kind {
            MetricKind::Real => Self::from_real(self.as_real() - by.as_real()),
            MetricKind::Integer => Self(self.0.wrapping_sub(by.0)),
        };
    }

    /// Formats the value through the view selected by `kind`.
    pub fn display(self, kind: MetricKind) -> DisplayMetric {
        DisplayMetric { value: self, kind }
    }
}

impl fmt::Debug for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.as_int(), self.as_real())
    }
}

pub struct DisplayMetric {
    value: MetricValue,
    kind: MetricKind,
}

impl fmt::Display for DisplayMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MetricKind::Integer => write!(f, "{}", self.value.as_int()),
            MetricKind::Real => write!(f, "{}", self.value.as_real()),
        }
    }
}
