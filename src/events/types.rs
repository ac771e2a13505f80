use serde::{Deserialize, Serialize};

use crate::models::{Endpoint, LogEntry, Parameter, QuestionPrompt, QuestionResult, Vulnerability};
use crate::orchestrator::state::PhaseName;

/// Every event produced by one scan. All variants carry the scan id; the
/// socket layer mirrors these verbatim as `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ScanEvent {
    #[serde(rename = "scan:started")]
    ScanStarted { scan_id: String, target: String },
    #[serde(rename = "scan:completed")]
    ScanCompleted {
        scan_id: String,
        final_score: u32,
        grade: String,
        vulnerabilities_found: usize,
    },
    #[serde(rename = "scan:error")]
    ScanError { scan_id: String, error: String },
    #[serde(rename = "scan:paused")]
    ScanPaused { scan_id: String },
    #[serde(rename = "scan:resumed")]
    ScanResumed { scan_id: String },
    #[serde(rename = "scan:stopped")]
    ScanStopped { scan_id: String },
    #[serde(rename = "phase:started")]
    PhaseStarted { scan_id: String, phase: PhaseName },
    #[serde(rename = "phase:completed")]
    PhaseCompleted { scan_id: String, phase: PhaseName },
    #[serde(rename = "subphase:started")]
    SubphaseStarted {
        scan_id: String,
        phase: PhaseName,
        subphase: String,
    },
    #[serde(rename = "subphase:completed")]
    SubphaseCompleted {
        scan_id: String,
        phase: PhaseName,
        subphase: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },
    #[serde(rename = "log:added")]
    LogAdded { scan_id: String, entry: LogEntry },
    #[serde(rename = "endpoint:discovered")]
    EndpointDiscovered { scan_id: String, endpoint: Endpoint },
    #[serde(rename = "parameter:discovered")]
    ParameterDiscovered { scan_id: String, parameter: Parameter },
    #[serde(rename = "vulnerability:found")]
    VulnerabilityFound {
        scan_id: String,
        vulnerability: Vulnerability,
    },
    #[serde(rename = "question:asked")]
    QuestionAsked {
        scan_id: String,
        prompt: QuestionPrompt,
    },
    #[serde(rename = "question:answered")]
    QuestionAnswered {
        scan_id: String,
        selected_answer: usize,
    },
    #[serde(rename = "question:result")]
    QuestionResult {
        scan_id: String,
        result: QuestionResult,
    },
    #[serde(rename = "crawler:finished")]
    CrawlerFinished { scan_id: String, csv_path: String },
    #[serde(rename = "crawler:failed")]
    CrawlerFailed { scan_id: String, message: String },
}

impl ScanEvent {
    pub fn scan_id(&self) -> &str {
        match self {
            Self::ScanStarted { scan_id, .. }
            | Self::ScanCompleted { scan_id, .. }
            | Self::ScanError { scan_id, .. }
            | Self::ScanPaused { scan_id }
            | Self::ScanResumed { scan_id }
            | Self::ScanStopped { scan_id }
            | Self::PhaseStarted { scan_id, .. }
            | Self::PhaseCompleted { scan_id, .. }
            | Self::SubphaseStarted { scan_id, .. }
            | Self::SubphaseCompleted { scan_id, .. }
            | Self::LogAdded { scan_id, .. }
            | Self::EndpointDiscovered { scan_id, .. }
            | Self::ParameterDiscovered { scan_id, .. }
            | Self::VulnerabilityFound { scan_id, .. }
            | Self::QuestionAsked { scan_id, .. }
            | Self::QuestionAnswered { scan_id, .. }
            | Self::QuestionResult { scan_id, .. }
            | Self::CrawlerFinished { scan_id, .. }
            | Self::CrawlerFailed { scan_id, .. } => scan_id,
        }
    }

    /// Wire name of the event, e.g. `phase:started`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScanStarted { .. } => "scan:started",
            Self::ScanCompleted { .. } => "scan:completed",
            Self::ScanError { .. } => "scan:error",
            Self::ScanPaused { .. } => "scan:paused",
            Self::ScanResumed { .. } => "scan:resumed",
            Self::ScanStopped { .. } => "scan:stopped",
            Self::PhaseStarted { .. } => "phase:started",
            Self::PhaseCompleted { .. } => "phase:completed",
            Self::SubphaseStarted { .. } => "subphase:started",
            Self::SubphaseCompleted { .. } => "subphase:completed",
            Self::LogAdded { .. } => "log:added",
            Self::EndpointDiscovered { .. } => "endpoint:discovered",
            Self::ParameterDiscovered { .. } => "parameter:discovered",
            Self::VulnerabilityFound { .. } => "vulnerability:found",
            Self::QuestionAsked { .. } => "question:asked",
            Self::QuestionAnswered { .. } => "question:answered",
            Self::QuestionResult { .. } => "question:result",
            Self::CrawlerFinished { .. } => "crawler:finished",
            Self::CrawlerFailed { .. } => "crawler:failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = ScanEvent::PhaseStarted {
            scan_id: "s1".to_string(),
            phase: PhaseName::Discovery,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "phase:started");
        assert_eq!(json["data"]["scan_id"], "s1");
    }

    #[test]
    fn test_event_name_matches_serde_tag() {
        let event = ScanEvent::CrawlerFinished {
            scan_id: "s1".to_string(),
            csv_path: "/tmp/results.csv".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
    }
}
