// =============================================================================
// CFTC Traders in Financial Futures - short format report extractor
// =============================================================================
//
// The weekly report is a preformatted HTML page.  After stripping markup each
// market section reads:
//
//   BITCOIN - CHICAGO MERCANTILE EXCHANGE ...
//   CFTC Code #133741          Open Interest is    27,951
//   Positions
//     dealer L S Sp   asset-mgr L S Sp   leveraged L S Sp   other L S Sp
//     nonreportable L S
//
// The report date comes from the "as of <Month> <day>, <year>" banner.
//
// Non-reportable positions are derived as open interest minus total
// reportable (long + spreading over the four reportable categories); the
// printed non-reportable pair is only cross-checked.
// =============================================================================

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::{ExtractionError, RecordExtractor};
use crate::history::record::{parse_count, total_of};
use crate::history::{HistoricalRecord, PositionCounts};
use crate::runtime_config::MarketIdentity;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Field names of the 14 figures on the positions line, in report order.
const POSITION_FIELDS: [&str; 14] = [
    "dealer long",
    "dealer short",
    "dealer spreading",
    "asset manager long",
    "asset manager short",
    "asset manager spreading",
    "leveraged funds long",
    "leveraged funds short",
    "leveraged funds spreading",
    "other reportables long",
    "other reportables short",
    "other reportables spreading",
    "nonreportable long",
    "nonreportable short",
];

/// Fetches the CFTC report page and extracts the configured market.
pub struct CftcReportExtractor {
    client: reqwest::Client,
    url: String,
    market: MarketIdentity,
}

impl CftcReportExtractor {
    pub fn new(
        url: impl Into<String>,
        market: MarketIdentity,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client, url, market))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>, market: MarketIdentity) -> Self {
        Self {
            client,
            url: url.into(),
            market,
        }
    }

    #[instrument(skip(self), fields(url = %self.url), name = "cftc::fetch_report")]
    async fn fetch_page(&self) -> Result<String, ExtractionError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractionError::Transport(format!(
                "GET {} returned {}",
                self.url, status
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;
        debug!(bytes = body.len(), "report page fetched");
        Ok(body)
    }
}

#[async_trait]
impl RecordExtractor for CftcReportExtractor {
    async fn extract(&self) -> Result<Option<HistoricalRecord>, ExtractionError> {
        let page = self.fetch_page().await?;
        parse_report(&page, &self.market)
    }

    fn source_name(&self) -> &'static str {
        "cftc"
    }
}

// =============================================================================
// Parsing
// =============================================================================

static RE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
static RE_AS_OF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"as of (\w+) (\d{1,2}), (\d{4})").expect("static regex"));

/// Strip markup and decode the handful of entities the report uses.
fn html_to_text(html: &str) -> String {
    RE_TAG
        .replace_all(html, "\n")
        .replace("&nbsp;", " ")
        .replace("&#44;", ",")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Parse the "as of <Month> <day>, <year>" report date.
pub fn parse_as_of_date(text: &str) -> Option<NaiveDate> {
    let caps = RE_AS_OF.captures(text)?;
    let joined = format!("{} {} {}", &caps[1], &caps[2], &caps[3]);
    NaiveDate::parse_from_str(&joined, "%B %d %Y").ok()
}

/// Section pattern for `market_name`. The name must open a line, so
/// "MICRO BITCOIN - ..." does not match "BITCOIN - ...".
fn section_regex(market_name: &str) -> Regex {
    let mut pattern = format!(
        r"(?sm)^[ \t]*{}.*?CFTC Code #(\d+)\s*Open Interest is\s*([\d,]+).*?Positions",
        regex::escape(market_name)
    );
    for _ in 0..POSITION_FIELDS.len() {
        pattern.push_str(r"\s+([\d,]+)");
    }
    Regex::new(&pattern).expect("escaped market name always forms a valid pattern")
}

fn number(field: &'static str, raw: &str) -> Result<u64, ExtractionError> {
    parse_count(raw).map_err(|_| ExtractionError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

/// Extract the configured market's record from a report page.
///
/// Returns `Ok(None)` when the page does not contain the market's section and
/// `Inconsistent` when the section is present under a different contract code.
pub fn parse_report(
    page: &str,
    market: &MarketIdentity,
) -> Result<Option<HistoricalRecord>, ExtractionError> {
    let text = html_to_text(page);

    let mut foreign_codes = Vec::new();
    let mut section = None;
    for caps in section_regex(&market.name).captures_iter(&text) {
        if market.contract_market_code.is_empty() || caps[1] == market.contract_market_code {
            section = Some(caps);
            break;
        }
        foreign_codes.push(caps[1].to_string());
    }

    let Some(caps) = section else {
        if !foreign_codes.is_empty() {
            return Err(ExtractionError::Inconsistent(format!(
                "section '{}' carries CFTC code {}, expected {}",
                market.name,
                foreign_codes.join(", "),
                market.contract_market_code
            )));
        }
        info!(market = %market.name, "market section not present in report");
        return Ok(None);
    };

    let report_date = parse_as_of_date(&text).ok_or(ExtractionError::DateNotFound)?;

    let contract_market_code = caps[1].to_string();
    let open_interest = number("open interest", &caps[2])?;

    let mut figures = [0u64; 14];
    for (i, field) in POSITION_FIELDS.iter().enumerate() {
        figures[i] = number(field, &caps[i + 3])?;
    }

    let dealer = PositionCounts::new(figures[0], figures[1], Some(figures[2]));
    let asset_manager = PositionCounts::new(figures[3], figures[4], Some(figures[5]));
    let leveraged_funds = PositionCounts::new(figures[6], figures[7], Some(figures[8]));
    let other_reportables = PositionCounts::new(figures[9], figures[10], Some(figures[11]));
    let printed_non_reportable = PositionCounts::new(figures[12], figures[13], None);

    let total_reportable = total_of(&[dealer, asset_manager, leveraged_funds, other_reportables])
        .ok_or_else(|| {
            ExtractionError::Inconsistent("total reportable positions overflow".to_string())
        })?;

    let non_long = open_interest
        .checked_sub(total_reportable.long_all)
        .ok_or_else(|| {
            ExtractionError::Inconsistent(format!(
                "total reportable long {} exceeds open interest {}",
                total_reportable.long_all, open_interest
            ))
        })?;
    let non_short = open_interest
        .checked_sub(total_reportable.short_all)
        .ok_or_else(|| {
            ExtractionError::Inconsistent(format!(
                "total reportable short {} exceeds open interest {}",
                total_reportable.short_all, open_interest
            ))
        })?;
    let non_reportable = PositionCounts::new(non_long, non_short, None);

    if non_reportable != printed_non_reportable {
        warn!(
            report_date = %report_date,
            derived_long = non_long,
            derived_short = non_short,
            printed_long = printed_non_reportable.long_all,
            printed_short = printed_non_reportable.short_all,
            "derived non-reportable positions differ from printed figures"
        );
    }

    debug!(
        report_date = %report_date,
        open_interest,
        contract = %contract_market_code,
        "report record extracted"
    );

    Ok(Some(HistoricalRecord {
        market_name: market.name.clone(),
        report_date,
        contract_market_code,
        market_code: market.market_code.clone(),
        region_code: market.region_code.clone(),
        commodity_code: market.commodity_code.clone(),
        open_interest,
        dealer,
        asset_manager,
        leveraged_funds,
        other_reportables,
        total_reportable,
        non_reportable,
    }))
}
