#![warn(missing_docs)]
//! # threatscope-ui
//!
//! ## Purpose
//! Presentation-facing projections for `threatscope`: what a view needs to
//! render an analysis, without rendering anything itself.
//!
//! ## Responsibilities
//! - Own the staged file's preview handle ([`PreviewResourceManager`]).
//! - Compose a terminal analysis into an [`AnalysisOutcome`].
//! - Provide status, risk and unread-badge labels.
//!
//! ## Data flow
//! Controller snapshot ([`AnalysisDetail`] + log text) -> [`compose_presentation`]
//! -> [`AnalysisPresentation`] consumed by the view layer.
//!
//! ## Ownership and lifetimes
//! Projections own their data so a view can keep them after the controller
//! publishes a newer snapshot.
//!
//! ## Error model
//! Composition is infallible. Inconsistent backend snapshots are carried as
//! [`IntegrityViolation`] values and risk-label divergence as a flag on
//! [`ResultView`].
//!
//! ## Security and privacy notes
//! Preview handles carry a digest prefix of the staged bytes, never the bytes.

mod preview;

use threatscope_analysis_contract::{RiskConsistency, RiskLevel, assess_risk, sort_threats};
use threatscope_core::{
    AnalysisDetail, AnalysisResult, AnalysisStatus, Component, Connection, IntegrityViolation,
    Threat,
};

pub use preview::{InMemoryPreviewBackend, PreviewBackend, PreviewHandle, PreviewResourceManager};

/// Shown when a failed analysis carries no error message.
pub const FAILED_WITHOUT_MESSAGE: &str = "Analysis failed without an error message";

/// Badge text cap.
pub const UNREAD_BADGE_CAP: u64 = 99;

/// Render-ready reading of a successful result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultView {
    /// Aggregate score as reported.
    pub risk_score: f64,
    /// Level to display.
    pub display_level: RiskLevel,
    /// Level derived locally from the score.
    pub derived_level: RiskLevel,
    /// `true` when the backend label diverges from the derived level.
    pub risk_label_mismatch: bool,
    /// Threats in presentation order.
    pub threats: Vec<Threat>,
    /// Detected components.
    pub components: Vec<Component>,
    /// Detected data flows.
    pub connections: Vec<Connection>,
    /// Threat count.
    pub threat_count: usize,
    /// Component count.
    pub component_count: usize,
    /// Short model name.
    pub model_label: String,
    /// Backend processing time in seconds.
    pub processing_time: Option<f64>,
}

impl ResultView {
    /// Builds the view of one result.
    pub fn from_result(result: &AnalysisResult) -> Self {
        let assessment = assess_risk(result);
        Self {
            risk_score: assessment.score,
            display_level: assessment.display_level,
            derived_level: assessment.consistency.derived(),
            risk_label_mismatch: assessment.consistency.is_defect(),
            threats: sort_threats(&result.threats),
            components: result.components.clone(),
            connections: result.connections.clone(),
            threat_count: result.threat_count(),
            component_count: result.component_count(),
            model_label: model_label(&result.model_used).to_string(),
            processing_time: result.processing_time,
        }
    }

    /// Label text for the displayed risk level.
    pub fn risk_text(&self) -> &'static str {
        risk_label(self.display_level)
    }
}

/// What a view shows for one analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// Still running.
    Pending {
        /// Last observed status.
        status: AnalysisStatus,
    },
    /// Finished with a result.
    Completed(Box<ResultView>),
    /// Finished successfully, but the backend attached no result.
    CompletedWithoutResult,
    /// Finished with an error.
    Failed {
        /// Backend error message.
        message: String,
    },
}

impl AnalysisOutcome {
    /// Returns `true` for every outcome except [`AnalysisOutcome::Pending`].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

/// Full projection of one analysis snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPresentation {
    /// Analysis identifier.
    pub id: String,
    /// Short code.
    pub code: String,
    /// Status label.
    pub status_label: &'static str,
    /// Outcome body.
    pub outcome: AnalysisOutcome,
    /// Log text; fetched logs win over inline logs.
    pub logs: Option<String>,
    /// Snapshot rules the backend violated.
    pub integrity: Vec<IntegrityViolation>,
}

/// Composes the outcome of a snapshot.
///
/// Risk classification and threat ordering only run for `ANALYZED` snapshots
/// that carry a result.
pub fn compose_outcome(detail: &AnalysisDetail) -> AnalysisOutcome {
    match detail.status {
        AnalysisStatus::Open | AnalysisStatus::Processing => AnalysisOutcome::Pending {
            status: detail.status,
        },
        AnalysisStatus::Failed => AnalysisOutcome::Failed {
            message: detail
                .error_message
                .as_deref()
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .unwrap_or(FAILED_WITHOUT_MESSAGE)
                .to_string(),
        },
        AnalysisStatus::Analyzed => match &detail.result {
            Some(result) => AnalysisOutcome::Completed(Box::new(ResultView::from_result(result))),
            None => AnalysisOutcome::CompletedWithoutResult,
        },
    }
}

/// Composes the full projection of a snapshot and its fetched log text.
pub fn compose_presentation(detail: &AnalysisDetail, logs: Option<&str>) -> AnalysisPresentation {
    let logs = logs
        .filter(|text| !text.trim().is_empty())
        .or(detail.processing_logs.as_deref())
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string);

    AnalysisPresentation {
        id: detail.id.clone(),
        code: detail.code.clone(),
        status_label: status_label(detail.status),
        outcome: compose_outcome(detail),
        logs,
        integrity: detail.integrity_violations(),
    }
}

/// Human-readable status label.
pub fn status_label(status: AnalysisStatus) -> &'static str {
    match status {
        AnalysisStatus::Open => "Open",
        AnalysisStatus::Processing => "Processing",
        AnalysisStatus::Analyzed => "Analyzed",
        AnalysisStatus::Failed => "Failed",
    }
}

/// Human-readable risk label.
pub fn risk_label(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "Low risk",
        RiskLevel::Medium => "Medium risk",
        RiskLevel::High => "High risk",
        RiskLevel::Critical => "Critical risk",
    }
}

/// Label shown for a consistency verdict, when it needs one.
pub fn consistency_note(consistency: &RiskConsistency) -> Option<String> {
    match consistency {
        RiskConsistency::Consistent(_) | RiskConsistency::Unreported(_) => None,
        RiskConsistency::Mismatch { reported, derived } => Some(format!(
            "Reported level {reported} does not match score-derived level {derived}"
        )),
        RiskConsistency::Unrecognized { label, derived } => Some(format!(
            "Unrecognized level '{label}', score-derived level is {derived}"
        )),
    }
}

/// Trailing segment of a `vendor/model` identifier.
pub fn model_label(model_used: &str) -> &str {
    model_used
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(model_used)
}

/// Unread badge text; `None` when nothing is unread.
pub fn unread_badge(count: u64) -> Option<String> {
    match count {
        0 => None,
        count if count > UNREAD_BADGE_CAP => Some(format!("{UNREAD_BADGE_CAP}+")),
        count => Some(count.to_string()),
    }
}
