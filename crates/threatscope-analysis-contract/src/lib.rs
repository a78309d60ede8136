#![warn(missing_docs)]
//! # threatscope-analysis-contract
//!
//! ## Purpose
//! Defines the client-side reading of analysis results: risk classification,
//! deterministic threat ordering, and validated payload parsing.
//!
//! ## Responsibilities
//! - Map aggregate risk scores to [`RiskLevel`] over fixed thresholds.
//! - Cross-check the backend's risk label against the local classification.
//! - Order threats by DREAD score with a stable, total rule.
//! - Parse analysis detail payloads and reject blank identifiers.
//!
//! ## Data flow
//! Raw JSON -> [`parse_analysis_detail`] -> terminal result ->
//! [`assess_risk`] + [`sort_threats`] -> presentation projection.
//!
//! ## Ownership and lifetimes
//! Sorting returns owned threats so callers can keep the arrival order intact
//! in the shared snapshot.
//!
//! ## Error model
//! Invalid JSON or blank identifiers return [`AnalysisContractError`]. Label
//! divergence is not an error; it is reported through [`RiskConsistency`].
//!
//! ## Example
//! ```rust
//! use threatscope_analysis_contract::{RiskLevel, classify};
//!
//! assert_eq!(classify(7.8), RiskLevel::High);
//! assert_eq!(classify(-4.0), RiskLevel::Low);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use threatscope_core::{AnalysisDetail, AnalysisResult, Threat};

/// Scores strictly below this value are `LOW`.
pub const MEDIUM_THRESHOLD: f64 = 3.0;
/// Scores strictly below this value (and at least [`MEDIUM_THRESHOLD`]) are `MEDIUM`.
pub const HIGH_THRESHOLD: f64 = 6.0;
/// Scores at or above this value are `CRITICAL`.
pub const CRITICAL_THRESHOLD: f64 = 8.0;

/// Aggregate risk category, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// Score below 3.
    Low,
    /// Score in [3, 6).
    Medium,
    /// Score in [6, 8).
    High,
    /// Score of 8 or more.
    Critical,
}

impl RiskLevel {
    /// Canonical wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies an aggregate score.
///
/// Total over `f64`: negative and `NaN` inputs clamp to `LOW`, anything above
/// the nominal 0..=10 range clamps to `CRITICAL`. Each threshold value belongs
/// to the higher bucket.
pub fn classify(score: f64) -> RiskLevel {
    if score.is_nan() {
        return RiskLevel::Low;
    }

    let score = score.clamp(0.0, 10.0);
    if score < MEDIUM_THRESHOLD {
        RiskLevel::Low
    } else if score < HIGH_THRESHOLD {
        RiskLevel::Medium
    } else if score < CRITICAL_THRESHOLD {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

/// Parses a backend risk label, including the localized labels older
/// backends emit.
pub fn parse_backend_level(label: &str) -> Option<RiskLevel> {
    match label.trim().to_lowercase().as_str() {
        "low" | "baixo" => Some(RiskLevel::Low),
        "medium" | "médio" | "medio" => Some(RiskLevel::Medium),
        "high" | "alto" => Some(RiskLevel::High),
        "critical" | "crítico" | "critico" => Some(RiskLevel::Critical),
        _ => None,
    }
}

/// Outcome of comparing the backend label with the local classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskConsistency {
    /// Backend label matches the local classification.
    Consistent(RiskLevel),
    /// Backend sent no label; only the local classification exists.
    Unreported(RiskLevel),
    /// Backend label disagrees with the local classification.
    Mismatch {
        /// Level claimed by the backend.
        reported: RiskLevel,
        /// Level derived from the score.
        derived: RiskLevel,
    },
    /// Backend label is not a known level.
    Unrecognized {
        /// Raw backend label.
        label: String,
        /// Level derived from the score.
        derived: RiskLevel,
    },
}

impl RiskConsistency {
    /// Locally derived level.
    pub fn derived(&self) -> RiskLevel {
        match self {
            Self::Consistent(level) | Self::Unreported(level) => *level,
            Self::Mismatch { derived, .. } | Self::Unrecognized { derived, .. } => *derived,
        }
    }

    /// Returns `true` when the backend label cannot be trusted as-is.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::Mismatch { .. } | Self::Unrecognized { .. })
    }
}

/// Risk reading of one terminal result.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    /// Aggregate score as reported.
    pub score: f64,
    /// Level shown to the user: the backend label when recognized, otherwise
    /// the local classification.
    pub display_level: RiskLevel,
    /// Consistency verdict between backend and local classification.
    pub consistency: RiskConsistency,
}

/// Compares the backend risk label of `result` against [`classify`].
pub fn check_consistency(result: &AnalysisResult) -> RiskConsistency {
    let derived = classify(result.risk_score);
    match result.risk_level.as_deref() {
        None => RiskConsistency::Unreported(derived),
        Some(label) => match parse_backend_level(label) {
            Some(reported) if reported == derived => RiskConsistency::Consistent(derived),
            Some(reported) => RiskConsistency::Mismatch { reported, derived },
            None => RiskConsistency::Unrecognized {
                label: label.to_string(),
                derived,
            },
        },
    }
}

/// Builds the risk reading used for display.
pub fn assess_risk(result: &AnalysisResult) -> RiskAssessment {
    let consistency = check_consistency(result);
    let display_level = match &consistency {
        RiskConsistency::Mismatch { reported, .. } => *reported,
        other => other.derived(),
    };

    RiskAssessment {
        score: result.risk_score,
        display_level,
        consistency,
    }
}

/// Ordering key of a threat: its DREAD score, with missing or `NaN` scores
/// read as `0`.
pub fn threat_score(threat: &Threat) -> f64 {
    match threat.dread_score {
        Some(score) if !score.is_nan() => score,
        _ => 0.0,
    }
}

/// Returns threats ordered by descending DREAD score.
///
/// The sort is stable: equal scores keep their arrival order.
pub fn sort_threats(threats: &[Threat]) -> Vec<Threat> {
    let mut ordered = threats.to_vec();
    ordered.sort_by(|left, right| threat_score(right).total_cmp(&threat_score(left)));
    ordered
}

/// Parses raw JSON into a validated analysis detail record.
///
/// # Errors
/// Returns [`AnalysisContractError::Decode`] for invalid JSON.
/// Returns [`AnalysisContractError::InvalidContract`] when the identifier is blank.
pub fn parse_analysis_detail(raw: &str) -> Result<AnalysisDetail, AnalysisContractError> {
    let parsed: AnalysisDetail = serde_json::from_str(raw).map_err(AnalysisContractError::Decode)?;

    if parsed.id.trim().is_empty() {
        return Err(AnalysisContractError::InvalidContract(
            "id is empty".to_string(),
        ));
    }

    Ok(parsed)
}

/// Analysis contract errors.
#[derive(Debug, Error)]
pub enum AnalysisContractError {
    /// JSON decode failure.
    #[error("analysis decode failure: {0}")]
    Decode(#[from] serde_json::Error),
    /// Parsed payload violates contract invariants.
    #[error("analysis contract violation: {0}")]
    InvalidContract(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for classification boundaries and label checks.

    use super::*;

    fn result(score: f64, label: Option<&str>) -> AnalysisResult {
        AnalysisResult {
            risk_score: score,
            risk_level: label.map(str::to_string),
            threats: vec![],
            components: vec![],
            connections: vec![],
            model_used: "m".to_string(),
            processing_time: None,
            threat_count: None,
            component_count: None,
        }
    }

    #[test]
    fn thresholds_belong_to_the_higher_bucket() {
        assert_eq!(classify(2.999), RiskLevel::Low);
        assert_eq!(classify(3.0), RiskLevel::Medium);
        assert_eq!(classify(6.0), RiskLevel::High);
        assert_eq!(classify(8.0), RiskLevel::Critical);
        assert_eq!(classify(f64::INFINITY), RiskLevel::Critical);
        assert_eq!(classify(f64::NAN), RiskLevel::Low);
    }

    #[test]
    fn localized_label_matching_score_is_consistent() {
        let consistency = check_consistency(&result(4.2, Some("Médio")));
        assert_eq!(consistency, RiskConsistency::Consistent(RiskLevel::Medium));
    }

    #[test]
    fn diverging_label_is_flagged_but_still_displayed() {
        let assessment = assess_risk(&result(7.8, Some("LOW")));
        assert!(assessment.consistency.is_defect());
        assert_eq!(assessment.display_level, RiskLevel::Low);
        assert_eq!(assessment.consistency.derived(), RiskLevel::High);
    }
}
