// =============================================================================
// Net Positions - long minus short per participant category
// =============================================================================
//
// Pure transform from the history table to one net series per category.
// Every category is derived on every pass because any pair may be selected.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::history::HistoryTable;
use crate::types::ParticipantCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetPoint {
    pub report_date: NaiveDate,
    pub net: i64,
}

/// Net positions of one category, aligned 1:1 with the history rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetPositionSeries {
    pub category: ParticipantCategory,
    pub points: Vec<NetPoint>,
}

impl NetPositionSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.report_date).collect()
    }

    pub fn values(&self) -> Vec<i64> {
        self.points.iter().map(|p| p.net).collect()
    }
}

/// Net series for every category, keyed in canonical category order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetPositionSet {
    series: BTreeMap<ParticipantCategory, NetPositionSeries>,
}

impl NetPositionSet {
    pub fn get(&self, category: ParticipantCategory) -> Option<&NetPositionSeries> {
        self.series.get(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetPositionSeries> {
        self.series.values()
    }
}

/// `long_all - short_all` for `category` on every row of `table`.
pub fn derive_net(table: &HistoryTable, category: ParticipantCategory) -> NetPositionSeries {
    let points = table
        .records()
        .iter()
        .map(|r| NetPoint {
            report_date: r.report_date,
            net: r.positions(category).net(),
        })
        .collect();
    NetPositionSeries { category, points }
}

/// Derive the net series of every category.
pub fn derive_all(table: &HistoryTable) -> NetPositionSet {
    let series = ParticipantCategory::ALL
        .into_iter()
        .map(|c| (c, derive_net(table, c)))
        .collect();
    NetPositionSet { series }
}
