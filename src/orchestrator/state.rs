use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Endpoint, LogEntry, QuestionResult, Vulnerability};

/// Top-level stage of the scan state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PhaseName {
    Init,
    Discovery,
    Sqli,
    Xss,
    Report,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Discovery => "discovery",
            Self::Sqli => "sqli",
            Self::Xss => "xss",
            Self::Report => "report",
        }
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a phase or sub-phase. Moves monotonically
/// `pending -> running -> (completed | error)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseProgress {
    Pending,
    Running,
    Completed,
    Error,
}

impl PhaseProgress {
    fn order(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Error => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubPhaseState {
    pub name: String,
    pub status: PhaseProgress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    pub name: PhaseName,
    pub status: PhaseProgress,
    pub sub_phases: Vec<SubPhaseState>,
}

impl PhaseState {
    pub fn new(name: PhaseName, sub_phases: &[&str]) -> Self {
        Self {
            name,
            status: PhaseProgress::Pending,
            sub_phases: sub_phases
                .iter()
                .map(|s| SubPhaseState {
                    name: s.to_string(),
                    status: PhaseProgress::Pending,
                })
                .collect(),
        }
    }

    /// Advance the phase status; transitions backwards are ignored.
    pub fn set_status(&mut self, status: PhaseProgress) {
        if status.order() >= self.status.order() {
            self.status = status;
        }
    }

    pub fn set_sub_phase_status(&mut self, sub_phase: &str, status: PhaseProgress) {
        if let Some(sp) = self.sub_phases.iter_mut().find(|sp| sp.name == sub_phase) {
            if status.order() >= sp.status.order() {
                sp.status = status;
            }
        }
    }
}

/// External lifecycle state of the scan record, in the persistence schema's
/// locale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScanEstado {
    #[serde(rename = "pendiente")]
    Pendiente,
    #[serde(rename = "en_progreso")]
    EnProgreso,
    #[serde(rename = "finalizado")]
    Finalizado,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "detenido")]
    Detenido,
}

impl ScanEstado {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pendiente => "pendiente",
            Self::EnProgreso => "en_progreso",
            Self::Finalizado => "finalizado",
            Self::Error => "error",
            Self::Detenido => "detenido",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_requests: u64,
    pub vulnerabilities_found: usize,
    pub endpoints_discovered: usize,
    pub parameters_found: usize,
}

/// Point-in-time view of a running scan, served to the status endpoint and
/// the socket. Log buffer is truncated to the most recent 50 entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStatusSnapshot {
    pub scan_id: String,
    pub current_phase: Option<PhaseName>,
    pub is_paused: bool,
    pub phases: Vec<PhaseState>,
    pub discovered_endpoints: Vec<Endpoint>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub question_results: Vec<QuestionResult>,
    pub stats: ScanStats,
    pub logs: Vec<LogEntry>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_progress_is_monotonic() {
        let mut phase = PhaseState::new(PhaseName::Discovery, &[]);
        phase.set_status(PhaseProgress::Running);
        phase.set_status(PhaseProgress::Pending);
        assert_eq!(phase.status, PhaseProgress::Running);
        phase.set_status(PhaseProgress::Completed);
        phase.set_status(PhaseProgress::Running);
        assert_eq!(phase.status, PhaseProgress::Completed);
    }

    #[test]
    fn test_sub_phase_lookup_and_advance() {
        let mut phase = PhaseState::new(PhaseName::Sqli, &["detection", "fingerprint"]);
        phase.set_sub_phase_status("detection", PhaseProgress::Running);
        phase.set_sub_phase_status("missing", PhaseProgress::Running);
        assert_eq!(phase.sub_phases[0].status, PhaseProgress::Running);
        assert_eq!(phase.sub_phases[1].status, PhaseProgress::Pending);
    }

    #[test]
    fn test_phase_name_display() {
        assert_eq!(format!("{}", PhaseName::Discovery), "discovery");
        assert_eq!(format!("{}", PhaseName::Sqli), "sqli");
    }

    #[test]
    fn test_estado_wire_names() {
        assert_eq!(ScanEstado::EnProgreso.as_str(), "en_progreso");
        let parsed: ScanEstado = serde_json::from_str("\"detenido\"").unwrap();
        assert_eq!(parsed, ScanEstado::Detenido);
    }
}
