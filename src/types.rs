// =============================================================================
// Shared types used across the COT divergence monitor
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a participant or indicator identifier is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} identifier '{value}'")]
pub struct UnknownIdentifier {
    pub kind: &'static str,
    pub value: String,
}

/// Trader classification used by the Traders in Financial Futures report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantCategory {
    #[serde(alias = "Dealer_Net")]
    Dealer,
    #[serde(alias = "Asset_Manager_Net")]
    AssetManager,
    #[serde(alias = "Leveraged_Funds_Net")]
    LeveragedFunds,
    #[serde(alias = "Other_Net")]
    OtherReportables,
    #[serde(alias = "Nonreportable")]
    NonReportable,
}

impl ParticipantCategory {
    /// Every category, in report column order.
    pub const ALL: [ParticipantCategory; 5] = [
        Self::Dealer,
        Self::AssetManager,
        Self::LeveragedFunds,
        Self::OtherReportables,
        Self::NonReportable,
    ];

    /// Stable identifier used in query strings and config files.
    pub fn id(self) -> &'static str {
        match self {
            Self::Dealer => "dealer",
            Self::AssetManager => "asset_manager",
            Self::LeveragedFunds => "leveraged_funds",
            Self::OtherReportables => "other_reportables",
            Self::NonReportable => "non_reportable",
        }
    }

    /// Legend label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Dealer => "Dealers",
            Self::AssetManager => "Asset Managers",
            Self::LeveragedFunds => "Leveraged Funds",
            Self::OtherReportables => "Other Reportables",
            Self::NonReportable => "Nonreportable",
        }
    }
}

impl std::fmt::Display for ParticipantCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for ParticipantCategory {
    type Err = UnknownIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase();
        let category = match normalised.as_str() {
            "dealer" | "dealers" | "dealer_net" => Self::Dealer,
            "asset_manager" | "asset_managers" | "asset_manager_net" => Self::AssetManager,
            "leveraged_funds" | "leveraged_funds_net" => Self::LeveragedFunds,
            "other_reportables" | "other_net" => Self::OtherReportables,
            "non_reportable" | "nonreportable" => Self::NonReportable,
            _ => {
                return Err(UnknownIdentifier {
                    kind: "participant",
                    value: s.to_string(),
                })
            }
        };
        Ok(category)
    }
}

/// Divergence indicator computed between two net-position series.
///
/// Variant order is the canonical output order of the divergence engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    #[serde(alias = "abs_diff")]
    AbsoluteDifference,
    #[serde(alias = "rel_diff")]
    RelativeDifference,
    PercentDelta,
    Crossover,
    DivergenceIndex,
    PercentageDifference,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 6] = [
        Self::AbsoluteDifference,
        Self::RelativeDifference,
        Self::PercentDelta,
        Self::Crossover,
        Self::DivergenceIndex,
        Self::PercentageDifference,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::AbsoluteDifference => "absolute_difference",
            Self::RelativeDifference => "relative_difference",
            Self::PercentDelta => "percent_delta",
            Self::Crossover => "crossover",
            Self::DivergenceIndex => "divergence_index",
            Self::PercentageDifference => "percentage_difference",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::AbsoluteDifference => "Absolute difference",
            Self::RelativeDifference => "Relative difference",
            Self::PercentDelta => "Percent delta",
            Self::Crossover => "Crossover (1 / -1)",
            Self::DivergenceIndex => "Normalised absolute difference",
            Self::PercentageDifference => "Percentage difference between participants",
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for IndicatorKind {
    type Err = UnknownIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase();
        let kind = match normalised.as_str() {
            "absolute_difference" | "abs_diff" => Self::AbsoluteDifference,
            "relative_difference" | "rel_diff" => Self::RelativeDifference,
            "percent_delta" => Self::PercentDelta,
            "crossover" => Self::Crossover,
            "divergence_index" => Self::DivergenceIndex,
            "percentage_difference" => Self::PercentageDifference,
            _ => {
                return Err(UnknownIdentifier {
                    kind: "indicator",
                    value: s.to_string(),
                })
            }
        };
        Ok(kind)
    }
}

/// Parse a comma-separated identifier list (`"dealer,asset_manager"`).
/// Empty segments are ignored.
pub fn parse_list<T>(raw: &str) -> Result<Vec<T>, UnknownIdentifier>
where
    T: FromStr<Err = UnknownIdentifier>,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_ids_roundtrip() {
        for category in ParticipantCategory::ALL {
            assert_eq!(category.id().parse::<ParticipantCategory>(), Ok(category));
        }
    }

    #[test]
    fn participant_accepts_legacy_column_names() {
        assert_eq!(
            "Asset_Manager_Net".parse::<ParticipantCategory>(),
            Ok(ParticipantCategory::AssetManager)
        );
        assert_eq!(
            "Nonreportable".parse::<ParticipantCategory>(),
            Ok(ParticipantCategory::NonReportable)
        );
    }

    #[test]
    fn unknown_participant_is_rejected() {
        let err = "retail".parse::<ParticipantCategory>().unwrap_err();
        assert_eq!(err.kind, "participant");
        assert_eq!(err.value, "retail");
    }

    #[test]
    fn indicator_aliases() {
        assert_eq!("abs_diff".parse::<IndicatorKind>(), Ok(IndicatorKind::AbsoluteDifference));
        assert_eq!("rel_diff".parse::<IndicatorKind>(), Ok(IndicatorKind::RelativeDifference));
        assert_eq!(" Crossover ".parse::<IndicatorKind>(), Ok(IndicatorKind::Crossover));
    }

    #[test]
    fn serde_uses_snake_case_ids() {
        let json = serde_json::to_string(&IndicatorKind::DivergenceIndex).unwrap();
        assert_eq!(json, "\"divergence_index\"");
        let kind: IndicatorKind = serde_json::from_str("\"abs_diff\"").unwrap();
        assert_eq!(kind, IndicatorKind::AbsoluteDifference);
        let cat: ParticipantCategory = serde_json::from_str("\"Leveraged_Funds_Net\"").unwrap();
        assert_eq!(cat, ParticipantCategory::LeveragedFunds);
    }

    #[test]
    fn parse_list_skips_blanks() {
        let parsed: Vec<ParticipantCategory> = parse_list("dealer, ,asset_manager,").unwrap();
        assert_eq!(
            parsed,
            vec![ParticipantCategory::Dealer, ParticipantCategory::AssetManager]
        );
        assert!(parse_list::<IndicatorKind>("crossover,bogus").is_err());
    }
}
