// =============================================================================
// Reference Price Series
// =============================================================================
//
// Close prices used as chart context next to the positioning series.  The
// series is best-effort: a failed fetch leaves an empty series behind and
// nothing downstream depends on it being populated.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One closed kline reduced to its open time and close price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub interval: String,
    pub points: Vec<PricePoint>,
    /// `None` until a fetch has succeeded.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl PriceSeries {
    pub fn empty(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            points: Vec::new(),
            fetched_at: None,
        }
    }

    /// Build a series from fetched points, sorted by timestamp.
    pub fn from_points(
        symbol: impl Into<String>,
        interval: impl Into<String>,
        mut points: Vec<PricePoint>,
    ) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            points,
            fetched_at: Some(Utc::now()),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.last()
    }
}
