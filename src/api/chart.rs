// =============================================================================
// Chart Payloads
// =============================================================================
//
// Renderer-neutral figure data.  The positioning chart carries one solid trace
// per selected participant and one dotted trace per indicator on the shared
// report-date axis; undefined indicator points stay `null` so a renderer
// leaves gaps instead of drawing zeros.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::divergence::{self, DivergenceError};
use crate::market_data::PriceSeries;
use crate::positions::NetPositionSet;
use crate::types::{IndicatorKind, ParticipantCategory};

pub const POSITIONS_TITLE: &str = "Net Positions & Divergence Analysis";
pub const SELECTION_PROMPT: &str = "Select exactly 2 participants to compute divergence";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    Solid,
    Dot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace<X> {
    pub name: String,
    pub line: LineStyle,
    pub x: Vec<X>,
    pub y: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPayload<X> {
    pub title: String,
    pub x_axis_title: &'static str,
    pub y_axis_title: Option<String>,
    pub traces: Vec<Trace<X>>,
    /// Set when the selection could not be charted.
    pub error: Option<String>,
}

/// Participant and indicator traces for one selection.
///
/// An invalid selection yields a payload titled with the selection prompt and
/// no traces.
pub fn positions_chart(
    set: &NetPositionSet,
    participants: &[ParticipantCategory],
    kinds: &[IndicatorKind],
) -> ChartPayload<NaiveDate> {
    match build_traces(set, participants, kinds) {
        Ok(traces) => ChartPayload {
            title: POSITIONS_TITLE.to_string(),
            x_axis_title: "Date",
            y_axis_title: None,
            traces,
            error: None,
        },
        Err(e) => ChartPayload {
            title: SELECTION_PROMPT.to_string(),
            x_axis_title: "Date",
            y_axis_title: None,
            traces: Vec::new(),
            error: Some(e.to_string()),
        },
    }
}

fn build_traces(
    set: &NetPositionSet,
    participants: &[ParticipantCategory],
    kinds: &[IndicatorKind],
) -> Result<Vec<Trace<NaiveDate>>, DivergenceError> {
    let indicators = divergence::compute_for(set, participants, kinds)?;

    let mut traces = Vec::with_capacity(2 + indicators.len());
    for &category in participants {
        let series = set
            .get(category)
            .ok_or(DivergenceError::MissingSeries(category))?;
        traces.push(Trace {
            name: category.label().to_string(),
            line: LineStyle::Solid,
            x: series.dates(),
            y: series.points.iter().map(|p| Some(p.net as f64)).collect(),
        });
    }
    for series in indicators {
        traces.push(Trace {
            name: series.kind.label().to_string(),
            line: LineStyle::Dot,
            x: series.points.iter().map(|p| p.report_date).collect(),
            y: series.values(),
        });
    }
    Ok(traces)
}

/// Reference price figure. An empty series gives a figure with one empty
/// trace.
pub fn price_chart(series: &PriceSeries) -> ChartPayload<DateTime<Utc>> {
    ChartPayload {
        title: format!("{} Price (Binance)", series.symbol),
        x_axis_title: "Date",
        y_axis_title: Some("Price".to_string()),
        traces: vec![Trace {
            name: format!("{} Price", series.symbol),
            line: LineStyle::Solid,
            x: series.points.iter().map(|p| p.timestamp).collect(),
            y: series.points.iter().map(|p| Some(p.close)).collect(),
        }],
        error: None,
    }
}
