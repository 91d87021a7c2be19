// =============================================================================
// Historical Record - one Traders in Financial Futures snapshot per date
// =============================================================================
//
// The persisted table is a CSV file whose header names the columns.  Files
// written by older tooling may order columns differently or carry extra
// columns, so every read goes through a `TableLayout` built from the header
// and every write renders the record in that same layout.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};

use super::normalize_report_date;
use crate::types::ParticipantCategory;

/// Compact date format used by the `As_of_Date_In_Form_YYMMDD` column.
pub const COMPACT_DATE_FORMAT: &str = "%y%m%d";
/// Display date format used by the `Report_Date_as_DD_MM_YYYY` column.
pub const DISPLAY_DATE_FORMAT: &str = "%d.%m.%Y";

// =============================================================================
// Columns
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    MarketName,
    ReportDateCompact,
    ReportDateDisplay,
    ContractMarketCode,
    MarketCode,
    RegionCode,
    CommodityCode,
    OpenInterest,
    DealerLong,
    DealerShort,
    DealerSpread,
    AssetMgrLong,
    AssetMgrShort,
    AssetMgrSpread,
    LevMoneyLong,
    LevMoneyShort,
    LevMoneySpread,
    OtherReptLong,
    OtherReptShort,
    OtherReptSpread,
    TotReptLong,
    TotReptShort,
    NonReptLong,
    NonReptShort,
}

impl Column {
    /// Canonical column order for newly created tables.
    pub const CANONICAL: [Column; 24] = [
        Self::MarketName,
        Self::ReportDateCompact,
        Self::ReportDateDisplay,
        Self::ContractMarketCode,
        Self::MarketCode,
        Self::RegionCode,
        Self::CommodityCode,
        Self::OpenInterest,
        Self::DealerLong,
        Self::DealerShort,
        Self::DealerSpread,
        Self::AssetMgrLong,
        Self::AssetMgrShort,
        Self::AssetMgrSpread,
        Self::LevMoneyLong,
        Self::LevMoneyShort,
        Self::LevMoneySpread,
        Self::OtherReptLong,
        Self::OtherReptShort,
        Self::OtherReptSpread,
        Self::TotReptLong,
        Self::TotReptShort,
        Self::NonReptLong,
        Self::NonReptShort,
    ];

    /// Columns a table must carry for records to be reconstructed.
    pub const REQUIRED: [Column; 12] = [
        Self::ReportDateCompact,
        Self::OpenInterest,
        Self::DealerLong,
        Self::DealerShort,
        Self::AssetMgrLong,
        Self::AssetMgrShort,
        Self::LevMoneyLong,
        Self::LevMoneyShort,
        Self::OtherReptLong,
        Self::OtherReptShort,
        Self::NonReptLong,
        Self::NonReptShort,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Self::MarketName => "Market_and_Exchange_Names",
            Self::ReportDateCompact => "As_of_Date_In_Form_YYMMDD",
            Self::ReportDateDisplay => "Report_Date_as_DD_MM_YYYY",
            Self::ContractMarketCode => "CFTC_Contract_Market_Code",
            Self::MarketCode => "CFTC_Market_Code",
            Self::RegionCode => "CFTC_Region_Code",
            Self::CommodityCode => "CFTC_Commodity_Code",
            Self::OpenInterest => "Open_Interest_All",
            Self::DealerLong => "Dealer_Positions_Long_All",
            Self::DealerShort => "Dealer_Positions_Short_All",
            Self::DealerSpread => "Dealer_Positions_Spread_All",
            Self::AssetMgrLong => "Asset_Mgr_Positions_Long_All",
            Self::AssetMgrShort => "Asset_Mgr_Positions_Short_All",
            Self::AssetMgrSpread => "Asset_Mgr_Positions_Spread_All",
            Self::LevMoneyLong => "Lev_Money_Positions_Long_All",
            Self::LevMoneyShort => "Lev_Money_Positions_Short_All",
            Self::LevMoneySpread => "Lev_Money_Positions_Spread_All",
            Self::OtherReptLong => "Other_Rept_Positions_Long_All",
            Self::OtherReptShort => "Other_Rept_Positions_Short_All",
            Self::OtherReptSpread => "Other_Rept_Positions_Spread_All",
            Self::TotReptLong => "Tot_Rept_Positions_Long_All",
            Self::TotReptShort => "Tot_Rept_Positions_Short_All",
            Self::NonReptLong => "NonRept_Positions_Long_All",
            Self::NonReptShort => "NonRept_Positions_Short_All",
        }
    }

    pub fn from_header(name: &str) -> Option<Column> {
        let name = name.trim();
        Self::CANONICAL.into_iter().find(|c| c.header() == name)
    }
}

// =============================================================================
// Layout
// =============================================================================

/// Mapping between a table header and the known columns.
///
/// `slots[i]` is the column at physical position `i`, `None` for headers this
/// crate does not interpret (they are preserved as empty cells on append).
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    slots: Vec<Option<Column>>,
    headers: Vec<String>,
    index: HashMap<Column, usize>,
}

impl TableLayout {
    pub fn canonical() -> Self {
        let headers: Vec<String> = Column::CANONICAL
            .iter()
            .map(|c| c.header().to_string())
            .collect();
        Self::from_headers(headers)
    }

    fn from_headers(headers: Vec<String>) -> Self {
        let slots: Vec<Option<Column>> = headers.iter().map(|h| Column::from_header(h)).collect();
        let mut index = HashMap::new();
        for (pos, slot) in slots.iter().enumerate() {
            if let Some(column) = slot {
                // First occurrence wins for repeated headers.
                index.entry(*column).or_insert(pos);
            }
        }
        Self {
            slots,
            headers,
            index,
        }
    }

    /// Build a layout from a header row. Fails with the list of missing
    /// required headers.
    pub fn from_header(header: &StringRecord) -> Result<Self, Vec<&'static str>> {
        let headers = header.iter().map(|h| h.trim().to_string()).collect();
        let layout = Self::from_headers(headers);
        let missing: Vec<&'static str> = Column::REQUIRED
            .iter()
            .filter(|c| !layout.index.contains_key(c))
            .map(|c| c.header())
            .collect();
        if missing.is_empty() {
            Ok(layout)
        } else {
            Err(missing)
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn cell<'r>(&self, row: &'r StringRecord, column: Column) -> Option<&'r str> {
        self.index
            .get(&column)
            .and_then(|&pos| row.get(pos))
            .map(str::trim)
    }
}

// =============================================================================
// Record
// =============================================================================

/// Long / short / spreading counts for one participant category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionCounts {
    pub long_all: u64,
    pub short_all: u64,
    /// Spreading positions; absent for categories that do not report them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spreading_all: Option<u64>,
}

impl PositionCounts {
    pub fn new(long_all: u64, short_all: u64, spreading_all: Option<u64>) -> Self {
        Self {
            long_all,
            short_all,
            spreading_all,
        }
    }

    /// Net position: long minus short, exact.
    pub fn net(&self) -> i64 {
        self.long_all as i64 - self.short_all as i64
    }
}

/// One reporting-date snapshot of the CME Bitcoin futures positioning report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub market_name: String,
    pub report_date: NaiveDate,
    pub contract_market_code: String,
    pub market_code: String,
    pub region_code: String,
    pub commodity_code: String,
    pub open_interest: u64,
    pub dealer: PositionCounts,
    pub asset_manager: PositionCounts,
    pub leveraged_funds: PositionCounts,
    pub other_reportables: PositionCounts,
    pub total_reportable: PositionCounts,
    pub non_reportable: PositionCounts,
}

/// Why a data row could not be turned into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub column: &'static str,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "column {} value '{}': {}", self.column, self.value, self.reason)
    }
}

impl HistoricalRecord {
    /// Counts for the given participant category.
    pub fn positions(&self, category: ParticipantCategory) -> &PositionCounts {
        match category {
            ParticipantCategory::Dealer => &self.dealer,
            ParticipantCategory::AssetManager => &self.asset_manager,
            ParticipantCategory::LeveragedFunds => &self.leveraged_funds,
            ParticipantCategory::OtherReportables => &self.other_reportables,
            ParticipantCategory::NonReportable => &self.non_reportable,
        }
    }

    pub fn compact_date(&self) -> String {
        self.report_date.format(COMPACT_DATE_FORMAT).to_string()
    }

    pub fn display_date(&self) -> String {
        self.report_date.format(DISPLAY_DATE_FORMAT).to_string()
    }

    /// Parse one data row according to `layout`.
    pub fn from_row(layout: &TableLayout, row: &StringRecord) -> Result<Self, RowError> {
        let text = |column: Column| layout.cell(row, column).unwrap_or("").to_string();

        let required = |column: Column| -> Result<u64, RowError> {
            let raw = layout.cell(row, column).unwrap_or("");
            parse_count(raw).map_err(|reason| RowError {
                column: column.header(),
                value: raw.to_string(),
                reason,
            })
        };

        let optional = |column: Column| -> Result<Option<u64>, RowError> {
            match layout.cell(row, column) {
                None | Some("") => Ok(None),
                Some(raw) => parse_count(raw).map(Some).map_err(|reason| RowError {
                    column: column.header(),
                    value: raw.to_string(),
                    reason,
                }),
            }
        };

        let raw_date = layout.cell(row, Column::ReportDateCompact).unwrap_or("");
        let report_date = parse_report_date(raw_date).ok_or_else(|| RowError {
            column: Column::ReportDateCompact.header(),
            value: raw_date.to_string(),
            reason: "not a YYMMDD or ISO date".to_string(),
        })?;

        let dealer = PositionCounts::new(
            required(Column::DealerLong)?,
            required(Column::DealerShort)?,
            optional(Column::DealerSpread)?,
        );
        let asset_manager = PositionCounts::new(
            required(Column::AssetMgrLong)?,
            required(Column::AssetMgrShort)?,
            optional(Column::AssetMgrSpread)?,
        );
        let leveraged_funds = PositionCounts::new(
            required(Column::LevMoneyLong)?,
            required(Column::LevMoneyShort)?,
            optional(Column::LevMoneySpread)?,
        );
        let other_reportables = PositionCounts::new(
            required(Column::OtherReptLong)?,
            required(Column::OtherReptShort)?,
            optional(Column::OtherReptSpread)?,
        );
        let non_reportable = PositionCounts::new(
            required(Column::NonReptLong)?,
            required(Column::NonReptShort)?,
            None,
        );

        let reportable = [dealer, asset_manager, leveraged_funds, other_reportables];
        let total_reportable = match (
            optional(Column::TotReptLong)?,
            optional(Column::TotReptShort)?,
        ) {
            (Some(long_all), Some(short_all)) => PositionCounts::new(long_all, short_all, None),
            _ => total_of(&reportable).ok_or_else(|| RowError {
                column: Column::TotReptLong.header(),
                value: String::new(),
                reason: "total reportable positions overflow".to_string(),
            })?,
        };

        Ok(Self {
            market_name: text(Column::MarketName),
            report_date,
            contract_market_code: text(Column::ContractMarketCode),
            market_code: text(Column::MarketCode),
            region_code: text(Column::RegionCode),
            commodity_code: text(Column::CommodityCode),
            open_interest: required(Column::OpenInterest)?,
            dealer,
            asset_manager,
            leveraged_funds,
            other_reportables,
            total_reportable,
            non_reportable,
        })
    }

    fn cell_value(&self, column: Column) -> String {
        let spread = |c: &PositionCounts| c.spreading_all.map(|v| v.to_string()).unwrap_or_default();
        match column {
            Column::MarketName => self.market_name.clone(),
            Column::ReportDateCompact => self.compact_date(),
            Column::ReportDateDisplay => self.display_date(),
            Column::ContractMarketCode => self.contract_market_code.clone(),
            Column::MarketCode => self.market_code.clone(),
            Column::RegionCode => self.region_code.clone(),
            Column::CommodityCode => self.commodity_code.clone(),
            Column::OpenInterest => self.open_interest.to_string(),
            Column::DealerLong => self.dealer.long_all.to_string(),
            Column::DealerShort => self.dealer.short_all.to_string(),
            Column::DealerSpread => spread(&self.dealer),
            Column::AssetMgrLong => self.asset_manager.long_all.to_string(),
            Column::AssetMgrShort => self.asset_manager.short_all.to_string(),
            Column::AssetMgrSpread => spread(&self.asset_manager),
            Column::LevMoneyLong => self.leveraged_funds.long_all.to_string(),
            Column::LevMoneyShort => self.leveraged_funds.short_all.to_string(),
            Column::LevMoneySpread => spread(&self.leveraged_funds),
            Column::OtherReptLong => self.other_reportables.long_all.to_string(),
            Column::OtherReptShort => self.other_reportables.short_all.to_string(),
            Column::OtherReptSpread => spread(&self.other_reportables),
            Column::TotReptLong => self.total_reportable.long_all.to_string(),
            Column::TotReptShort => self.total_reportable.short_all.to_string(),
            Column::NonReptLong => self.non_reportable.long_all.to_string(),
            Column::NonReptShort => self.non_reportable.short_all.to_string(),
        }
    }

    /// Render the record as cells in `layout` order; unknown columns are empty.
    pub fn to_row(&self, layout: &TableLayout) -> Vec<String> {
        layout
            .slots
            .iter()
            .map(|slot| slot.map(|c| self.cell_value(c)).unwrap_or_default())
            .collect()
    }
}

/// Total reportable positions: long (short) plus spreading, summed over the
/// given categories. `None` when a sum does not fit in a `u64`.
pub fn total_of(reportable: &[PositionCounts]) -> Option<PositionCounts> {
    let mut long_all: u64 = 0;
    let mut short_all: u64 = 0;
    for c in reportable {
        let spread = c.spreading_all.unwrap_or(0);
        long_all = long_all.checked_add(c.long_all)?.checked_add(spread)?;
        short_all = short_all.checked_add(c.short_all)?.checked_add(spread)?;
    }
    Some(PositionCounts::new(long_all, short_all, None))
}

/// Parse a non-negative contract count. Accepts thousands separators and
/// integral float spellings such as `1234.0`.
pub fn parse_count(raw: &str) -> Result<u64, String> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return Err("empty value".to_string());
    }
    if let Ok(v) = cleaned.parse::<u64>() {
        return Ok(v);
    }
    match cleaned.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
            Ok(f as u64)
        }
        Ok(_) => Err("not a non-negative integer".to_string()),
        Err(_) => Err("not a number".to_string()),
    }
}

/// Parse the report date key. Accepts `YYMMDD` (with the leading zero lost by
/// spreadsheet tools, e.g. `50103`), `YYMMDD.0`, ISO `YYYY-MM-DD`, and
/// timestamps (`YYYY-MM-DD HH:MM:SS`, RFC 3339) whose time of day is dropped.
pub fn parse_report_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(normalize_report_date(&at));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(normalize_report_date(&at.and_utc()));
        }
    }
    let digits = raw.strip_suffix(".0").unwrap_or(raw);
    if digits.is_empty() || digits.len() > 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{digits:0>6}");
    NaiveDate::parse_from_str(&padded, COMPACT_DATE_FORMAT).ok()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::test_support::sample_record;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn canonical_layout_roundtrips_a_record() {
        let layout = TableLayout::canonical();
        let record = sample_record(date(2024, 1, 9), 120, 30);
        let row = StringRecord::from(record.to_row(&layout));
        let parsed = HistoricalRecord::from_row(&layout, &row).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn to_row_follows_existing_header_order() {
        let header = StringRecord::from(vec![
            "NonRept_Positions_Short_All",
            "Comment",
            "As_of_Date_In_Form_YYMMDD",
            "Open_Interest_All",
            "Dealer_Positions_Long_All",
            "Dealer_Positions_Short_All",
            "Asset_Mgr_Positions_Long_All",
            "Asset_Mgr_Positions_Short_All",
            "Lev_Money_Positions_Long_All",
            "Lev_Money_Positions_Short_All",
            "Other_Rept_Positions_Long_All",
            "Other_Rept_Positions_Short_All",
            "NonRept_Positions_Long_All",
        ]);
        let layout = TableLayout::from_header(&header).unwrap();
        let record = sample_record(date(2024, 1, 9), 120, 30);
        let row = record.to_row(&layout);
        assert_eq!(row.len(), 13);
        assert_eq!(row[0], record.non_reportable.short_all.to_string());
        assert_eq!(row[1], "");
        assert_eq!(row[2], "240109");
        assert_eq!(row[6], "120");
        assert_eq!(row[7], "30");
    }

    #[test]
    fn header_missing_required_columns_is_rejected() {
        let header = StringRecord::from(vec!["As_of_Date_In_Form_YYMMDD", "Open_Interest_All"]);
        let missing = TableLayout::from_header(&header).unwrap_err();
        assert!(missing.contains(&"Dealer_Positions_Long_All"));
        assert!(missing.contains(&"NonRept_Positions_Short_All"));
        assert!(!missing.contains(&"Open_Interest_All"));
    }

    #[test]
    fn parse_count_variants() {
        assert_eq!(parse_count("1,234"), Ok(1234));
        assert_eq!(parse_count(" 42 "), Ok(42));
        assert_eq!(parse_count("17.0"), Ok(17));
        assert!(parse_count("-3").is_err());
        assert!(parse_count("1.5").is_err());
        assert!(parse_count("").is_err());
        assert!(parse_count("abc").is_err());
    }

    #[test]
    fn parse_report_date_variants() {
        assert_eq!(parse_report_date("240102"), Some(date(2024, 1, 2)));
        assert_eq!(parse_report_date("50103"), Some(date(2005, 1, 3)));
        assert_eq!(parse_report_date("240102.0"), Some(date(2024, 1, 2)));
        assert_eq!(parse_report_date("2024-01-02"), Some(date(2024, 1, 2)));
        assert_eq!(parse_report_date("2024-01-02 00:00:00"), Some(date(2024, 1, 2)));
        assert_eq!(parse_report_date("2024-01-02T15:45:00"), Some(date(2024, 1, 2)));
        assert_eq!(parse_report_date("2024-01-02 00:00:00.000"), Some(date(2024, 1, 2)));
        assert_eq!(parse_report_date("2024-01-02T23:30:00-05:00"), Some(date(2024, 1, 2)));
        assert_eq!(parse_report_date("241302"), None);
        assert_eq!(parse_report_date("02.01.2024"), None);
    }

    #[test]
    fn net_is_exact_and_signed() {
        let counts = PositionCounts::new(40, 100, Some(7));
        assert_eq!(counts.net(), -60);
    }

    #[test]
    fn total_reportable_derived_when_columns_absent() {
        let header = StringRecord::from(
            Column::REQUIRED.iter().map(|c| c.header()).collect::<Vec<_>>(),
        );
        let layout = TableLayout::from_header(&header).unwrap();
        let row = StringRecord::from(vec![
            "240102", "1000", "10", "20", "30", "40", "50", "60", "70", "80", "5", "6",
        ]);
        let record = HistoricalRecord::from_row(&layout, &row).unwrap();
        assert_eq!(record.total_reportable.long_all, 10 + 30 + 50 + 70);
        assert_eq!(record.total_reportable.short_all, 20 + 40 + 60 + 80);
        assert_eq!(record.dealer.spreading_all, None);
        assert_eq!(record.market_name, "");
    }

    #[test]
    fn total_of_overflow_is_none() {
        assert_eq!(total_of(&[PositionCounts::new(u64::MAX, 0, Some(1))]), None);
        assert_eq!(
            total_of(&[PositionCounts::new(u64::MAX - 1, 3, Some(1))]),
            Some(PositionCounts::new(u64::MAX, 4, None))
        );
    }

    #[test]
    fn overflowing_derived_total_is_a_row_error() {
        let header = StringRecord::from(
            Column::REQUIRED.iter().map(|c| c.header()).collect::<Vec<_>>(),
        );
        let layout = TableLayout::from_header(&header).unwrap();
        let max = u64::MAX.to_string();
        let row = StringRecord::from(vec![
            "240102", "1000", max.as_str(), "20", "30", "40", "50", "60", "70", "80", "5", "6",
        ]);
        let err = HistoricalRecord::from_row(&layout, &row).unwrap_err();
        assert_eq!(err.column, "Tot_Rept_Positions_Long_All");
    }

    #[test]
    fn bad_cell_reports_column() {
        let layout = TableLayout::canonical();
        let mut cells = sample_record(date(2024, 1, 2), 1, 1).to_row(&layout);
        cells[8] = "n/a".to_string();
        let err = HistoricalRecord::from_row(&layout, &StringRecord::from(cells)).unwrap_err();
        assert_eq!(err.column, "Dealer_Positions_Long_All");
        assert_eq!(err.value, "n/a");
    }
}
