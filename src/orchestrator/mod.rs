pub mod state;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ScanConfig;
use crate::errors::ScanError;
use crate::events::{EventBus, ScanEvent};
use crate::exec::{DalfoxExecutor, ProcessRegistry, SqlmapExecutor};
use crate::gate::QuestionGate;
use crate::logging::ScanLogger;
use crate::models::{Endpoint, LogLevel, Parameter, QuestionResult, Vulnerability, VulnKind};
use crate::questions::QuestionSource;
use crate::scoring::{compute_score, FinalScore};
use state::{PhaseName, PhaseProgress, PhaseState, ScanStats, ScanStatusSnapshot};

/// Cap on draining stray child processes before the report phase.
const PROCESS_WAIT_CAP: Duration = Duration::from_secs(60);

/// Everything a finished scan hands to the persistence adapter.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub target_url: String,
    pub score: FinalScore,
    pub vulnerabilities: Vec<Vulnerability>,
    pub question_results: Vec<QuestionResult>,
    pub stats: ScanStats,
}

#[derive(Debug)]
pub enum ScanOutcome {
    Completed(Box<ScanReport>),
    Stopped,
}

struct Inner {
    current_phase: Option<PhaseName>,
    phases: Vec<PhaseState>,
    endpoints: Vec<Endpoint>,
    parameters: Vec<Parameter>,
    vulnerabilities: Vec<Vulnerability>,
    question_results: Vec<QuestionResult>,
    stats: ScanStats,
}

/// Top-level state machine for one scan. Runs as a single cooperative task:
/// phases are strictly sequential, parallelism exists only in the child
/// processes, and all mutable state is owned here.
pub struct ScanOrchestrator {
    scan_id: String,
    config: Arc<ScanConfig>,
    bus: Arc<EventBus>,
    logger: Arc<ScanLogger>,
    gate: Arc<QuestionGate>,
    sqlmap: SqlmapExecutor,
    dalfox: DalfoxExecutor,
    registry: Arc<ProcessRegistry>,
    cancel: CancellationToken,
    stopped: AtomicBool,
    state: Mutex<Inner>,
    started_at: DateTime<Utc>,
}

impl ScanOrchestrator {
    pub fn new(
        scan_id: impl Into<String>,
        config: ScanConfig,
        bus: Arc<EventBus>,
        questions: Arc<dyn QuestionSource>,
    ) -> Self {
        let scan_id = scan_id.into();
        let config = Arc::new(config);
        let cancel = CancellationToken::new();
        let registry = Arc::new(ProcessRegistry::new());
        let logger = Arc::new(ScanLogger::new(scan_id.as_str(), bus.clone()));
        let gate = Arc::new(QuestionGate::new(
            scan_id.as_str(),
            bus.clone(),
            questions,
            cancel.clone(),
        ));
        let sqlmap = SqlmapExecutor::new(
            scan_id.as_str(),
            config.clone(),
            logger.clone(),
            bus.clone(),
            registry.clone(),
            cancel.clone(),
        );
        let dalfox = DalfoxExecutor::new(
            config.clone(),
            logger.clone(),
            registry.clone(),
            cancel.clone(),
        );

        let mut phases = vec![
            PhaseState::new(PhaseName::Init, &[]),
            PhaseState::new(PhaseName::Discovery, &[]),
        ];
        if config.flags.sqli {
            phases.push(PhaseState::new(
                PhaseName::Sqli,
                &["detection", "fingerprint", "technique", "exploit"],
            ));
        }
        if config.flags.xss {
            phases.push(PhaseState::new(
                PhaseName::Xss,
                &["context", "payload", "fuzzing"],
            ));
        }
        phases.push(PhaseState::new(PhaseName::Report, &[]));

        Self {
            scan_id,
            config,
            bus,
            logger,
            gate,
            sqlmap,
            dalfox,
            registry,
            cancel,
            stopped: AtomicBool::new(false),
            state: Mutex::new(Inner {
                current_phase: None,
                phases,
                endpoints: Vec::new(),
                parameters: Vec::new(),
                vulnerabilities: Vec::new(),
                question_results: Vec::new(),
                stats: ScanStats::default(),
            }),
            started_at: Utc::now(),
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    pub(crate) fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub(crate) fn gate(&self) -> &QuestionGate {
        &self.gate
    }

    pub(crate) fn logger(&self) -> &ScanLogger {
        &self.logger
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn sqlmap(&self) -> &SqlmapExecutor {
        &self.sqlmap
    }

    pub(crate) fn dalfox(&self) -> &DalfoxExecutor {
        &self.dalfox
    }

    /// Pauses at the next cooperative point. No-op when already paused or
    /// stopped.
    pub fn pause(&self) {
        if self.is_stopped() || self.gate.is_paused() {
            return;
        }
        self.gate.pause();
        self.logger.log("Escaneo pausado", LogLevel::Info);
        self.bus.publish(ScanEvent::ScanPaused {
            scan_id: self.scan_id.clone(),
        });
    }

    /// Clears a pause and wakes the waiting task. No-op when not paused or
    /// stopped.
    pub fn resume(&self) {
        if self.is_stopped() || !self.gate.is_paused() {
            return;
        }
        self.gate.resume();
        self.logger.log("Escaneo reanudado", LogLevel::Info);
        self.bus.publish(ScanEvent::ScanResumed {
            scan_id: self.scan_id.clone(),
        });
    }

    /// One-way stop: cancels the task at its next suspension point, clears
    /// any pause, and terminates every tracked process.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.gate.resume();
        self.registry.kill_all().await;
        self.logger.log("Escaneo detenido por el usuario", LogLevel::Warning);
        self.bus.publish(ScanEvent::ScanStopped {
            scan_id: self.scan_id.clone(),
        });
    }

    /// Forwards a user answer to the pending gate question.
    pub fn answer_question(&self, selected_answer: usize) {
        self.gate.answer(selected_answer);
    }

    /// Point-in-time status snapshot. The log tail is bounded to 50 entries.
    pub fn status(&self) -> ScanStatusSnapshot {
        let inner = self.state.lock().unwrap();
        ScanStatusSnapshot {
            scan_id: self.scan_id.clone(),
            current_phase: inner.current_phase,
            is_paused: self.gate.is_paused(),
            phases: inner.phases.clone(),
            discovered_endpoints: inner.endpoints.clone(),
            vulnerabilities: inner.vulnerabilities.clone(),
            question_results: inner.question_results.clone(),
            stats: inner.stats,
            logs: self.logger.recent(50),
            started_at: self.started_at,
        }
    }

    /// Runs the scan to completion. A stop at any point resolves to
    /// `Stopped` without `scan:completed`; a fatal phase error purges the
    /// process registry, publishes `scan:error` and propagates.
    pub async fn run(&self) -> Result<ScanOutcome, ScanError> {
        self.bus.publish(ScanEvent::ScanStarted {
            scan_id: self.scan_id.clone(),
            target: self.config.target_url.clone(),
        });
        self.logger.log(
            &format!("Iniciando escaneo de {}", self.config.target_url),
            LogLevel::Info,
        );

        match self.run_phases().await {
            Ok(score) => {
                let report = self.build_report(score);
                self.bus.publish(ScanEvent::ScanCompleted {
                    scan_id: self.scan_id.clone(),
                    final_score: report.score.final_score,
                    grade: report.score.grade.as_str().to_string(),
                    vulnerabilities_found: report.vulnerabilities.len(),
                });
                info!(scan_id = %self.scan_id, score = report.score.final_score, "Scan completed");
                Ok(ScanOutcome::Completed(Box::new(report)))
            }
            Err(ScanError::Cancelled) => Ok(ScanOutcome::Stopped),
            Err(e) => {
                if self.is_stopped() {
                    return Ok(ScanOutcome::Stopped);
                }
                self.fail_current_phase();
                self.registry.kill_all().await;
                self.logger
                    .log(&format!("Error fatal en el escaneo: {}", e), LogLevel::Error);
                self.bus.publish(ScanEvent::ScanError {
                    scan_id: self.scan_id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_phases(&self) -> Result<FinalScore, ScanError> {
        // Init: availability pre-checks for the enabled scanners.
        self.begin_phase(PhaseName::Init)?;
        if self.config.flags.sqli {
            self.sqlmap.check_availability().await;
        }
        if self.config.flags.xss {
            self.dalfox.check_availability().await;
        }
        self.complete_phase(PhaseName::Init);

        self.begin_phase(PhaseName::Discovery)?;
        self.run_discovery_phase().await?;
        self.complete_phase(PhaseName::Discovery);

        if self.config.flags.sqli {
            self.begin_phase(PhaseName::Sqli)?;
            self.run_sqli_phase().await?;
            self.complete_phase(PhaseName::Sqli);
        }

        if self.config.flags.xss {
            self.begin_phase(PhaseName::Xss)?;
            self.run_xss_phase().await?;
            self.complete_phase(PhaseName::Xss);
        }

        self.check_stopped()?;
        self.registry.wait_all(PROCESS_WAIT_CAP).await;

        self.begin_phase(PhaseName::Report)?;
        let (question_results, vuln_count) = {
            let inner = self.state.lock().unwrap();
            (inner.question_results.clone(), inner.vulnerabilities.len())
        };
        let score = compute_score(&question_results, vuln_count);
        self.logger.log(
            &format!(
                "Puntuación final: {} ({}) — cuestionario {}/{}, {} vulnerabilidades",
                score.final_score,
                score.grade,
                score.quiz_points,
                score.total_quiz_points,
                vuln_count
            ),
            LogLevel::Success,
        );
        self.complete_phase(PhaseName::Report);
        Ok(score)
    }

    fn build_report(&self, score: FinalScore) -> ScanReport {
        let inner = self.state.lock().unwrap();
        ScanReport {
            scan_id: self.scan_id.clone(),
            target_url: self.config.target_url.clone(),
            score,
            vulnerabilities: inner.vulnerabilities.clone(),
            question_results: inner.question_results.clone(),
            stats: inner.stats,
        }
    }

    pub(crate) fn check_stopped(&self) -> Result<(), ScanError> {
        if self.is_stopped() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn begin_phase(&self, phase: PhaseName) -> Result<(), ScanError> {
        self.check_stopped()?;
        {
            let mut inner = self.state.lock().unwrap();
            inner.current_phase = Some(phase);
            if let Some(p) = inner.phases.iter_mut().find(|p| p.name == phase) {
                p.set_status(PhaseProgress::Running);
            }
        }
        self.logger.set_phase(phase.as_str());
        self.bus.publish(ScanEvent::PhaseStarted {
            scan_id: self.scan_id.clone(),
            phase,
        });
        Ok(())
    }

    fn complete_phase(&self, phase: PhaseName) {
        {
            let mut inner = self.state.lock().unwrap();
            if let Some(p) = inner.phases.iter_mut().find(|p| p.name == phase) {
                p.set_status(PhaseProgress::Completed);
            }
        }
        self.bus.publish(ScanEvent::PhaseCompleted {
            scan_id: self.scan_id.clone(),
            phase,
        });
    }

    fn fail_current_phase(&self) {
        let mut inner = self.state.lock().unwrap();
        if let Some(phase) = inner.current_phase {
            if let Some(p) = inner.phases.iter_mut().find(|p| p.name == phase) {
                p.set_status(PhaseProgress::Error);
            }
        }
    }

    pub(crate) fn begin_sub_phase(&self, phase: PhaseName, sub_phase: &str) {
        {
            let mut inner = self.state.lock().unwrap();
            if let Some(p) = inner.phases.iter_mut().find(|p| p.name == phase) {
                p.set_sub_phase_status(sub_phase, PhaseProgress::Running);
            }
        }
        self.bus.publish(ScanEvent::SubphaseStarted {
            scan_id: self.scan_id.clone(),
            phase,
            subphase: sub_phase.to_string(),
        });
    }

    pub(crate) fn complete_sub_phase(
        &self,
        phase: PhaseName,
        sub_phase: &str,
        detail: Option<serde_json::Value>,
    ) {
        {
            let mut inner = self.state.lock().unwrap();
            if let Some(p) = inner.phases.iter_mut().find(|p| p.name == phase) {
                p.set_sub_phase_status(sub_phase, PhaseProgress::Completed);
            }
        }
        self.bus.publish(ScanEvent::SubphaseCompleted {
            scan_id: self.scan_id.clone(),
            phase,
            subphase: sub_phase.to_string(),
            detail,
        });
    }

    /// Stores a vulnerability unless its `(kind, endpoint, parameter)` key is
    /// already present. Returns whether it was new.
    pub(crate) fn add_vulnerability(&self, vulnerability: Vulnerability) -> bool {
        {
            let mut inner = self.state.lock().unwrap();
            let duplicate = inner
                .vulnerabilities
                .iter()
                .any(|v| v.identity() == vulnerability.identity());
            if duplicate {
                return false;
            }
            inner.vulnerabilities.push(vulnerability.clone());
            inner.stats.vulnerabilities_found = inner.vulnerabilities.len();
        }
        self.bus.publish(ScanEvent::VulnerabilityFound {
            scan_id: self.scan_id.clone(),
            vulnerability,
        });
        true
    }

    /// Registers an endpoint, union-merging parameters into an existing
    /// entry with the same `(method, url)` identity. Returns whether it was
    /// new.
    pub(crate) fn add_endpoint(&self, endpoint: Endpoint) -> bool {
        {
            let mut inner = self.state.lock().unwrap();
            if let Some(existing) = inner
                .endpoints
                .iter_mut()
                .find(|e| e.key() == endpoint.key())
            {
                existing.merge_parameters(endpoint.parameters.iter().cloned());
                return false;
            }
            inner.endpoints.push(endpoint.clone());
            inner.stats.endpoints_discovered = inner.endpoints.len();
        }
        self.bus.publish(ScanEvent::EndpointDiscovered {
            scan_id: self.scan_id.clone(),
            endpoint,
        });
        true
    }

    pub(crate) fn add_parameter(&self, parameter: Parameter) -> bool {
        {
            let mut inner = self.state.lock().unwrap();
            if inner.parameters.iter().any(|p| p.key() == parameter.key()) {
                return false;
            }
            inner.parameters.push(parameter.clone());
            inner.stats.parameters_found = inner.parameters.len();
        }
        self.bus.publish(ScanEvent::ParameterDiscovered {
            scan_id: self.scan_id.clone(),
            parameter,
        });
        true
    }

    pub(crate) fn record_question(&self, result: QuestionResult) {
        self.state.lock().unwrap().question_results.push(result);
    }

    pub(crate) fn count_request(&self) {
        self.state.lock().unwrap().stats.total_requests += 1;
    }

    pub(crate) fn discovered_endpoints(&self) -> Vec<Endpoint> {
        self.state.lock().unwrap().endpoints.clone()
    }

    pub(crate) fn discovered_parameters(&self) -> Vec<Parameter> {
        self.state.lock().unwrap().parameters.clone()
    }

    pub(crate) fn findings_of_kind(&self, kind: VulnKind) -> Vec<Vulnerability> {
        self.state
            .lock()
            .unwrap()
            .vulnerabilities
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use crate::questions::QuestionBank;
    use serde_json::json;

    fn orchestrator() -> ScanOrchestrator {
        let config = crate::config::validate(&json!({
            "url": "http://site.test/",
            "flags": { "sqli": true, "xss": true }
        }))
        .unwrap();
        ScanOrchestrator::new(
            "scan-1",
            config,
            Arc::new(EventBus::new()),
            Arc::new(QuestionBank::builtin()),
        )
    }

    fn vuln(kind: VulnKind, endpoint: &str, parameter: &str, description: &str) -> Vulnerability {
        Vulnerability {
            kind,
            severity: Severity::Critical,
            endpoint: endpoint.to_string(),
            parameter: parameter.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_duplicate_vulnerability_suppressed() {
        let orch = orchestrator();
        assert!(orch.add_vulnerability(vuln(VulnKind::Sqli, "/a?x=1", "id", "'...")));
        assert!(!orch.add_vulnerability(vuln(VulnKind::Sqli, "/a?x=1", "id", "'...")));
        assert!(orch.add_vulnerability(vuln(VulnKind::Xss, "/b", "q", "<s>")));
        assert_eq!(orch.status().vulnerabilities.len(), 2);
    }

    #[test]
    fn test_endpoint_merge_on_duplicate() {
        let orch = orchestrator();
        let mut first = Endpoint::new("http://site.test/p", crate::models::HttpMethod::Get);
        first.merge_parameters(["a".to_string()]);
        let mut second = Endpoint::new("http://site.test/p", crate::models::HttpMethod::Get);
        second.merge_parameters(["b".to_string()]);

        assert!(orch.add_endpoint(first));
        assert!(!orch.add_endpoint(second));
        let status = orch.status();
        assert_eq!(status.discovered_endpoints.len(), 1);
        assert_eq!(status.discovered_endpoints[0].parameters.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_sticky() {
        let orch = orchestrator();
        orch.stop().await;
        assert!(orch.is_stopped());
        orch.stop().await;
        orch.pause();
        assert!(!orch.is_paused());
        assert!(orch.check_stopped().is_err());
    }

    #[test]
    fn test_pause_resume_idempotent() {
        let orch = orchestrator();
        orch.resume(); // not paused: no-op
        orch.pause();
        assert!(orch.is_paused());
        orch.pause();
        orch.resume();
        assert!(!orch.is_paused());
    }

    #[test]
    fn test_phase_list_respects_flags() {
        let config = crate::config::validate(&json!({
            "url": "http://site.test/",
            "flags": { "sqli": true, "xss": false }
        }))
        .unwrap();
        let orch = ScanOrchestrator::new(
            "scan-2",
            config,
            Arc::new(EventBus::new()),
            Arc::new(QuestionBank::builtin()),
        );
        let names: Vec<PhaseName> = orch.status().phases.iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                PhaseName::Init,
                PhaseName::Discovery,
                PhaseName::Sqli,
                PhaseName::Report
            ]
        );
    }

    #[test]
    fn test_snapshot_log_tail_bounded() {
        let orch = orchestrator();
        for i in 0..80 {
            orch.logger().log(&format!("línea {}", i), LogLevel::Info);
        }
        let status = orch.status();
        assert_eq!(status.logs.len(), 50);
        assert_eq!(status.logs[0].message, "línea 30");
    }
}
