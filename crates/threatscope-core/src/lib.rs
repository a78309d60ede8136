#![warn(missing_docs)]
//! # threatscope-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `threatscope` workspace.
//!
//! ## Responsibilities
//! - Mirror backend analysis records (create, summary, detail, result).
//! - Represent notifications and normalize their navigation links.
//! - Validate status-gated snapshot invariants without trusting the backend.
//! - Stage a locally selected diagram file for submission.
//!
//! ## Data flow
//! Gateway decodes wire JSON into [`AnalysisDetail`] / [`AnalysisSummary`] /
//! [`NotificationsUnread`]. Controllers hold these as read-only snapshots and
//! the presentation layer projects them after [`AnalysisDetail::integrity_violations`]
//! has been consulted.
//!
//! ## Ownership and lifetimes
//! Records own their strings and byte buffers so snapshots can be shared via
//! `Arc` between async tasks without borrowing from transient response bodies.
//!
//! ## Error model
//! Staging and decode failures return [`CoreError`]. Invariant violations on
//! server snapshots are reported as [`IntegrityViolation`] values rather than
//! hard errors, because the backend remains authoritative.
//!
//! ## Security and privacy notes
//! File bytes are never formatted into `Debug` output; only their length is.
//!
//! ## Example
//! ```rust
//! use threatscope_core::{AnalysisStatus, normalize_link};
//!
//! assert!(AnalysisStatus::Failed.is_terminal());
//! assert_eq!(normalize_link("analyses/42"), "/analyses/42");
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server-side analysis status.
///
/// The backend historically emitted localized names; they are accepted as
/// aliases on decode while English names are always serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisStatus {
    /// Accepted but not yet picked up by a worker.
    #[serde(rename = "OPEN", alias = "EM_ABERTO")]
    Open,
    /// Worker is running the analysis pipeline.
    #[serde(rename = "PROCESSING", alias = "PROCESSANDO")]
    Processing,
    /// Pipeline finished successfully.
    #[serde(rename = "ANALYZED", alias = "ANALISADO")]
    Analyzed,
    /// Pipeline failed.
    #[serde(rename = "FAILED", alias = "FALHOU")]
    Failed,
}

impl AnalysisStatus {
    /// Returns `true` for `ANALYZED` and `FAILED`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Analyzed | Self::Failed)
    }

    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Processing => "PROCESSING",
            Self::Analyzed => "ANALYZED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of `POST /analyses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCreated {
    /// Opaque analysis identifier.
    pub id: String,
    /// Human-readable short label.
    #[serde(default)]
    pub code: String,
    /// Initial status assigned by the backend.
    pub status: AnalysisStatus,
    /// Creation timestamp.
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    /// Relative URL of the stored diagram.
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Row of `GET /analyses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Opaque analysis identifier.
    pub id: String,
    /// Human-readable short label.
    #[serde(default)]
    pub code: String,
    /// Current status.
    pub status: AnalysisStatus,
    /// Creation timestamp.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Relative URL of the stored diagram.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Backend risk label, present once analyzed.
    #[serde(default)]
    pub risk_level: Option<String>,
    /// Aggregate risk score, present once analyzed.
    #[serde(default)]
    pub risk_score: Option<f64>,
    /// Number of threats, present once analyzed.
    #[serde(default)]
    pub threat_count: Option<usize>,
}

/// Full record of `GET /analyses/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDetail {
    /// Opaque analysis identifier.
    pub id: String,
    /// Human-readable short label.
    #[serde(default)]
    pub code: String,
    /// Current status.
    pub status: AnalysisStatus,
    /// Creation timestamp.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Worker pickup timestamp.
    #[serde(default, with = "timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff the status is terminal.
    #[serde(default, with = "timestamp::option")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Relative URL of the stored diagram.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Inline processing log text, when the backend embeds it.
    #[serde(default)]
    pub processing_logs: Option<String>,
    /// Present iff the status is `FAILED`.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Present only for `ANALYZED`; may be absent even then.
    #[serde(default)]
    pub result: Option<AnalysisResult>,
}

impl AnalysisDetail {
    /// Returns every status-gating rule this snapshot violates.
    ///
    /// An empty vector means the snapshot is internally consistent. A terminal
    /// `ANALYZED` record without a result is consistent (degraded outcome).
    pub fn integrity_violations(&self) -> Vec<IntegrityViolation> {
        let mut violations = Vec::new();
        let terminal = self.status.is_terminal();

        if terminal != self.finished_at.is_some() {
            violations.push(IntegrityViolation::FinishedAtMismatch {
                status: self.status,
            });
        }

        let failed = self.status == AnalysisStatus::Failed;
        if failed != self.error_message.is_some() {
            violations.push(IntegrityViolation::ErrorMessageMismatch {
                status: self.status,
            });
        }

        if self.result.is_some() && self.status != AnalysisStatus::Analyzed {
            violations.push(IntegrityViolation::UnexpectedResult {
                status: self.status,
            });
        }

        violations
    }
}

/// Status-gating rule broken by a server snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    /// `finished_at` presence disagrees with terminal status.
    #[error("finished_at presence does not match status {status}")]
    FinishedAtMismatch {
        /// Status carried by the snapshot.
        status: AnalysisStatus,
    },
    /// `error_message` presence disagrees with `FAILED` status.
    #[error("error_message presence does not match status {status}")]
    ErrorMessageMismatch {
        /// Status carried by the snapshot.
        status: AnalysisStatus,
    },
    /// A result is attached to a non-`ANALYZED` snapshot.
    #[error("result attached to status {status}")]
    UnexpectedResult {
        /// Status carried by the snapshot.
        status: AnalysisStatus,
    },
}

/// Threat analysis output attached to an analyzed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Aggregate score, nominally 0 to 10.
    pub risk_score: f64,
    /// Backend display label; re-derivable from `risk_score`.
    #[serde(default)]
    pub risk_level: Option<String>,
    /// Identified threats in arrival order.
    #[serde(default)]
    pub threats: Vec<Threat>,
    /// Architecture elements detected in the diagram.
    #[serde(default)]
    pub components: Vec<Component>,
    /// Data flows between detected components.
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Model identifier that produced the result.
    #[serde(default = "unknown_model")]
    pub model_used: String,
    /// Backend processing time in seconds.
    #[serde(default)]
    pub processing_time: Option<f64>,
    /// Backend-computed threat count.
    #[serde(default)]
    pub threat_count: Option<usize>,
    /// Backend-computed component count.
    #[serde(default)]
    pub component_count: Option<usize>,
}

impl AnalysisResult {
    /// Threat count, derived locally when the backend omitted it.
    pub fn threat_count(&self) -> usize {
        self.threat_count.unwrap_or(self.threats.len())
    }

    /// Component count, derived locally when the backend omitted it.
    pub fn component_count(&self) -> usize {
        self.component_count.unwrap_or(self.components.len())
    }
}

fn unknown_model() -> String {
    "Unknown".to_string()
}

/// STRIDE threat category.
///
/// Labels outside the taxonomy are preserved verbatim in [`StrideCategory::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StrideCategory {
    /// Identity impersonation.
    Spoofing,
    /// Unauthorized modification.
    Tampering,
    /// Deniable actions.
    Repudiation,
    /// Data exposure.
    InformationDisclosure,
    /// Availability loss.
    DenialOfService,
    /// Privilege escalation.
    ElevationOfPrivilege,
    /// Label not covered by the taxonomy.
    Other(String),
}

impl StrideCategory {
    /// Display label.
    pub fn label(&self) -> &str {
        match self {
            Self::Spoofing => "Spoofing",
            Self::Tampering => "Tampering",
            Self::Repudiation => "Repudiation",
            Self::InformationDisclosure => "Information Disclosure",
            Self::DenialOfService => "Denial of Service",
            Self::ElevationOfPrivilege => "Elevation of Privilege",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for StrideCategory {
    fn from(raw: String) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "spoofing" => Self::Spoofing,
            "tampering" => Self::Tampering,
            "repudiation" => Self::Repudiation,
            "informationdisclosure" => Self::InformationDisclosure,
            "denialofservice" => Self::DenialOfService,
            "elevationofprivilege" => Self::ElevationOfPrivilege,
            _ => Self::Other(raw),
        }
    }
}

impl From<StrideCategory> for String {
    fn from(category: StrideCategory) -> Self {
        category.label().to_string()
    }
}

impl Default for StrideCategory {
    fn default() -> Self {
        Self::Other("Unknown".to_string())
    }
}

/// One threat identified against a component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Threat {
    /// Component the threat applies to.
    pub component_id: String,
    /// STRIDE category.
    pub threat_type: StrideCategory,
    /// Free-text threat description.
    pub description: String,
    /// Free-text mitigation rationale.
    pub mitigation: String,
    /// DREAD aggregate score; absent when scoring failed.
    pub dread_score: Option<f64>,
    /// Per-dimension DREAD breakdown.
    pub dread_details: Option<DreadDetails>,
}

/// DREAD per-dimension scores.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DreadDetails {
    /// Damage potential.
    pub damage: Option<f64>,
    /// Reproducibility.
    pub reproducibility: Option<f64>,
    /// Exploitability.
    pub exploitability: Option<f64>,
    /// Affected users.
    pub affected_users: Option<f64>,
    /// Discoverability.
    pub discoverability: Option<f64>,
}

/// Architecture element detected in a diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Element identifier within the diagram.
    pub id: String,
    /// Element type (for example `Database` or `API Gateway`).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Element display name.
    #[serde(default)]
    pub name: String,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Data flow between two detected components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Source component id.
    #[serde(rename = "from_id", alias = "from")]
    pub from_id: String,
    /// Target component id.
    #[serde(rename = "to_id", alias = "to")]
    pub to_id: String,
    /// Transport protocol, when known.
    #[serde(default)]
    pub protocol: Option<String>,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the flow is encrypted, when known.
    #[serde(default)]
    pub encrypted: Option<bool>,
}

/// Response of `GET /analyses/{id}/logs`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalysisLogs {
    /// Processing log text; empty when nothing was written yet.
    #[serde(default)]
    pub logs: String,
}

/// One user notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification identifier.
    pub id: String,
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub message: String,
    /// Navigation target; may be relative.
    #[serde(default)]
    pub link: String,
    /// Creation timestamp.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Link normalized to an absolute path.
    pub fn target_path(&self) -> String {
        normalize_link(&self.link)
    }
}

/// Response of `GET /notifications/unread`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationsUnread {
    /// Server-side unread count; may exceed the listed items.
    #[serde(default)]
    pub unread_count: u64,
    /// Most recent unread notifications.
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

/// Normalizes a notification link into an absolute path.
///
/// Leading/trailing whitespace is trimmed and a `/` is prefixed when missing.
pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Diagram file staged for submission.
#[derive(Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Original file name, used as the multipart file name.
    pub file_name: String,
    /// Sniffed media type; [`FALLBACK_CONTENT_TYPE`] when unrecognized.
    pub content_type: &'static str,
    /// Raw file bytes.
    pub bytes: Vec<u8>,
}

impl StagedFile {
    /// Stages a file after sniffing its media type.
    ///
    /// Unrecognized payloads are staged as [`FALLBACK_CONTENT_TYPE`]; the
    /// analysis service decides whether it accepts them.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyFile`] for zero-length input.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, CoreError> {
        let file_name = file_name.into();
        if bytes.is_empty() {
            return Err(CoreError::EmptyFile(file_name));
        }

        let content_type = guess_image_content_type(&bytes).unwrap_or(FALLBACK_CONTENT_TYPE);

        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }

    /// Size of the staged payload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false` for a validly staged file.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Media type sent for payloads with no recognized image signature.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Infers an image media type from magic bytes.
pub fn guess_image_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(&[0xff, 0xd8]) {
        return Some("image/jpeg");
    }
    None
}

/// Error type for core validation and codec failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Staged file has no content.
    #[error("file '{0}' is empty")]
    EmptyFile(String),
    /// JSON decoding error.
    #[error("record codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Decodes an analysis detail record from raw JSON bytes.
///
/// # Errors
/// Returns [`CoreError::Codec`] when the payload does not match the record shape.
pub fn decode_detail(raw: &[u8]) -> Result<AnalysisDetail, CoreError> {
    serde_json::from_slice(raw).map_err(CoreError::Codec)
}

mod timestamp {
    //! Timestamp codec accepting RFC 3339 and offset-less ISO 8601 (read as UTC).

    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub(crate) fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub(crate) mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub(crate) fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_str(&value.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'"))),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for status handling and snapshot integrity.

    use super::*;

    fn detail(status: AnalysisStatus) -> AnalysisDetail {
        AnalysisDetail {
            id: "a-1".to_string(),
            code: "AN-0001".to_string(),
            status,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            image_url: None,
            processing_logs: None,
            error_message: None,
            result: None,
        }
    }

    #[test]
    fn only_analyzed_and_failed_are_terminal() {
        assert!(!AnalysisStatus::Open.is_terminal());
        assert!(!AnalysisStatus::Processing.is_terminal());
        assert!(AnalysisStatus::Analyzed.is_terminal());
        assert!(AnalysisStatus::Failed.is_terminal());
    }

    #[test]
    fn degraded_analyzed_without_result_is_consistent() {
        let mut record = detail(AnalysisStatus::Analyzed);
        record.finished_at = Some(Utc::now());
        assert!(record.integrity_violations().is_empty());
    }

    #[test]
    fn failed_without_message_or_finish_time_reports_both() {
        let record = detail(AnalysisStatus::Failed);
        let violations = record.integrity_violations();
        assert_eq!(violations.len(), 2);
        assert!(violations.contains(&IntegrityViolation::FinishedAtMismatch {
            status: AnalysisStatus::Failed
        }));
    }

    #[test]
    fn naive_backend_timestamps_are_read_as_utc() {
        let parsed = timestamp::parse("2025-03-01T10:20:30.123456").expect("naive timestamp");
        assert_eq!(parsed.to_rfc3339(), "2025-03-01T10:20:30.123456+00:00");
    }

    #[test]
    fn staged_file_sniffs_images_and_falls_back_for_unknown_bytes() {
        let png = StagedFile::new("diagram.png", b"\x89PNG\r\n\x1a\nrest".to_vec()).expect("png");
        assert_eq!(png.content_type, "image/png");

        let gif = StagedFile::new("diagram.gif", b"GIF89a\x01\x00\x01\x00".to_vec()).expect("gif");
        assert_eq!(gif.content_type, "image/gif");

        let text = StagedFile::new("notes.txt", b"hello".to_vec()).expect("any non-empty file stages");
        assert_eq!(text.content_type, FALLBACK_CONTENT_TYPE);

        assert!(matches!(
            StagedFile::new("empty.png", Vec::new()),
            Err(CoreError::EmptyFile(_))
        ));
    }
}
