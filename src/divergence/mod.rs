// =============================================================================
// Divergence Engine
// =============================================================================
//
// Computes indicator series between exactly two participant net-position
// series on a shared date axis.  Selection problems are reported up front as
// `InvalidSelection` and nothing is computed.
//
// Output order is the declaration order of `IndicatorKind`, with repeated
// kinds collapsed, so a given set of kinds always produces the same legend.
// =============================================================================

pub mod indicators;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::positions::{NetPositionSeries, NetPositionSet};
use crate::types::{IndicatorKind, ParticipantCategory};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DivergenceError {
    #[error("invalid selection: select exactly two participants ({0} given)")]
    WrongParticipantCount(usize),

    #[error("invalid selection: participant {0} selected twice")]
    DuplicateParticipant(ParticipantCategory),

    #[error("invalid selection: series for {0} and {1} are not on the same date axis")]
    Misaligned(ParticipantCategory, ParticipantCategory),

    #[error("invalid selection: no net series available for {0}")]
    MissingSeries(ParticipantCategory),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub report_date: NaiveDate,
    /// `None` where the indicator is undefined; serialised as `null`.
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivergenceSeries {
    pub kind: IndicatorKind,
    pub first: ParticipantCategory,
    pub second: ParticipantCategory,
    pub points: Vec<SeriesPoint>,
}

impl DivergenceSeries {
    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }
}

/// Evaluate one indicator kind over aligned value slices.
pub fn evaluate(kind: IndicatorKind, a: &[i64], b: &[i64]) -> Vec<Option<f64>> {
    match kind {
        IndicatorKind::AbsoluteDifference => indicators::absolute_difference(a, b),
        IndicatorKind::RelativeDifference => indicators::relative_difference(a, b),
        IndicatorKind::PercentDelta => indicators::percent_delta(a, b),
        IndicatorKind::Crossover => indicators::crossover(a, b),
        IndicatorKind::DivergenceIndex => indicators::divergence_index(a, b),
        IndicatorKind::PercentageDifference => indicators::percentage_difference(a, b),
    }
}

/// Canonical, duplicate-free ordering of the requested kinds.
pub fn canonical_kinds(kinds: &[IndicatorKind]) -> Vec<IndicatorKind> {
    let mut out = kinds.to_vec();
    out.sort();
    out.dedup();
    out
}

/// Compute `kinds` between the two series in `selection`.
///
/// `selection` must hold exactly two series of distinct categories with
/// identical date axes.
pub fn compute(
    selection: &[&NetPositionSeries],
    kinds: &[IndicatorKind],
) -> Result<Vec<DivergenceSeries>, DivergenceError> {
    let [first, second] = selection else {
        return Err(DivergenceError::WrongParticipantCount(selection.len()));
    };
    if first.category == second.category {
        return Err(DivergenceError::DuplicateParticipant(first.category));
    }
    if first.dates() != second.dates() {
        return Err(DivergenceError::Misaligned(first.category, second.category));
    }

    let dates = first.dates();
    let a = first.values();
    let b = second.values();

    let series = canonical_kinds(kinds)
        .into_iter()
        .map(|kind| {
            let points = dates
                .iter()
                .zip(evaluate(kind, &a, &b))
                .map(|(&report_date, value)| SeriesPoint { report_date, value })
                .collect();
            DivergenceSeries {
                kind,
                first: first.category,
                second: second.category,
                points,
            }
        })
        .collect();

    Ok(series)
}

/// Look up the selected categories in `set` and compute `kinds`.
///
/// The participant-count and duplicate checks run before any lookup so a
/// malformed selection is reported as such even on an empty set.
pub fn compute_for(
    set: &NetPositionSet,
    participants: &[ParticipantCategory],
    kinds: &[IndicatorKind],
) -> Result<Vec<DivergenceSeries>, DivergenceError> {
    if participants.len() != 2 {
        return Err(DivergenceError::WrongParticipantCount(participants.len()));
    }
    let selection = participants
        .iter()
        .map(|&c| set.get(c).ok_or(DivergenceError::MissingSeries(c)))
        .collect::<Result<Vec<_>, _>>()?;
    compute(&selection, kinds)
}
