//! Output types: the validated inspection report and the run metadata around it.
//!
//! [`InspectionReport`] is the wire contract returned to callers. Its fields
//! are private and it has no public constructor; the only way to obtain one
//! is [`crate::pipeline::validate::validate`], so a partially filled or
//! guessed report cannot exist.

use crate::pipeline::classify::DocumentKind;
use crate::pipeline::input::MediaType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Overall risk assessment for the inspected vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Canonical spelling used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(format!(
                "'{s}' is not one of Low, Medium, High, Critical"
            )),
        }
    }
}

/// A validated vehicle inspection report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectionReport {
    summary: String,
    risk_level: RiskLevel,
    issues: Vec<String>,
    maintenance: Vec<String>,
    recommendation: String,
}

impl InspectionReport {
    pub(crate) fn new(
        summary: String,
        risk_level: RiskLevel,
        issues: Vec<String>,
        maintenance: Vec<String>,
        recommendation: String,
    ) -> Self {
        Self {
            summary,
            risk_level,
            issues,
            maintenance,
            recommendation,
        }
    }

    /// One-line description of the vehicle's condition.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    /// Findings, in the order the model reported them. May be empty.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    /// Recommended maintenance actions, in order. May be empty.
    pub fn maintenance(&self) -> &[String] {
        &self.maintenance
    }

    pub fn recommendation(&self) -> &str {
        &self.recommendation
    }

    /// Serialise to the pretty-printed wire JSON.
    pub fn to_json_pretty(&self) -> String {
        // A struct of strings and a unit enum cannot fail to serialise.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Where the analysed content came from and how much of it was used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    /// File name or URL of the document, if known.
    pub name: Option<String>,
    /// Extraction path taken. `None` in pre-extracted text mode.
    pub kind: Option<DocumentKind>,
    pub media_type: Option<MediaType>,
    /// Pages in the source document (1 for images).
    pub total_pages: usize,
    /// Pages whose content actually reached the model.
    pub pages_analyzed: usize,
    /// `true` when only the first pages of a scanned PDF were forwarded.
    pub truncated: bool,
}

/// Timing and usage statistics for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Model calls made, across the main request and any repair round-trip.
    pub attempts: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Classification + extraction wall time.
    pub extract_duration_ms: u64,
    /// Model invocation wall time, including backoff sleeps.
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
    /// A malformed first response was repaired by a second request.
    pub repaired: bool,
}

/// Result of a successful analysis.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutput {
    pub report: InspectionReport,
    pub source: SourceInfo,
    pub stats: AnalysisStats,
}
