use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::ScanConfig;
use crate::errors::ScanError;
use crate::events::{EventBus, ScanEvent};
use crate::exec::spawn::{terminate_gracefully, ProcessRegistry, SpawnPlan, TERM_GRACE};
use crate::logging::ScanLogger;
use crate::models::{Endpoint, LogLevel, Parameter, Severity, Vulnerability, VulnKind};

/// The crawler's completion line, e.g.
/// `[12:34:56] [INFO] found a total of 12 targets`.
static CRAWL_DONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[?\d{2}:\d{2}:\d{2}\]?.*\[INFO\]\s+found a total of \d+ targets").unwrap()
});

static VULNERABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)vulnerable|injectable|injection point").unwrap());

/// `Parameter: id (GET)` style attribution headers.
static PARAM_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)parameter:\s*#?'?([A-Za-z0-9_\-\[\]]+)").unwrap());

/// Output that never belongs in the user-visible log: banner art, the legal
/// disclaimer, start/end timestamps, prompts, thread warnings and payload
/// place selectors.
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)legal disclaimer|starting @|ending @|sqlmap/\d|^\s*[_.\\/|~]{4,}|\[y/n|do you want|place: |\[warning\].*(thread|connection)",
    )
    .unwrap()
});

const CSV_POLL_ATTEMPTS: u32 = 3;
const CSV_POLL_DELAY: Duration = Duration::from_secs(2);
const CSV_MAX_AGE: Duration = Duration::from_secs(3600);

/// Testing mode of one invocation; maps to the extra CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliPhase {
    Detection,
    Fingerprint,
    Exploit,
}

impl SqliPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Fingerprint => "fingerprint",
            Self::Exploit => "exploit",
        }
    }

    fn extra_args(&self) -> &'static [&'static str] {
        match self {
            Self::Detection => &[],
            Self::Fingerprint => &["--fingerprint"],
            // Read-only proof queries; never destructive.
            Self::Exploit => &["--current-db", "--banner"],
        }
    }
}

#[derive(Debug, Default)]
struct RunOutcome {
    terminated: bool,
    timed_out: bool,
    cancelled: bool,
    exit_success: bool,
}

/// Supervises the SQLi scanner: crawl runs and per-target detection,
/// fingerprint and exploitation invocations.
pub struct SqlmapExecutor {
    scan_id: String,
    config: Arc<ScanConfig>,
    logger: Arc<ScanLogger>,
    bus: Arc<EventBus>,
    registry: Arc<ProcessRegistry>,
    cancel: CancellationToken,
    invocation_seq: AtomicU64,
}

impl SqlmapExecutor {
    pub fn new(
        scan_id: impl Into<String>,
        config: Arc<ScanConfig>,
        logger: Arc<ScanLogger>,
        bus: Arc<EventBus>,
        registry: Arc<ProcessRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scan_id: scan_id.into(),
            config,
            logger,
            bus,
            registry,
            cancel,
            invocation_seq: AtomicU64::new(0),
        }
    }

    pub async fn check_availability(&self) -> bool {
        match super::probe_version(&self.config.sqlmap_path, Duration::from_secs(10)).await {
            Ok(version) => {
                self.logger.log(
                    &format!("SQLi scanner disponible: {}", version),
                    LogLevel::Info,
                );
                true
            }
            Err(e) => {
                self.logger.log(
                    &format!(
                        "SQLi scanner no disponible ({}): {}",
                        self.config.sqlmap_path, e
                    ),
                    LogLevel::Warning,
                );
                false
            }
        }
    }

    /// Flags shared by every invocation: unattended defaults, verbosity,
    /// working directory, headers and the optional DBMS hint.
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--batch".to_string(),
            "--random-agent".to_string(),
            "-v".to_string(),
            "1".to_string(),
            "--threads".to_string(),
            self.config.threads.to_string(),
            "--answers".to_string(),
            "quit=N,crawl=y".to_string(),
            "--tmp-dir".to_string(),
            self.config.tmp_dir.display().to_string(),
        ];
        if let Some(dbms) = &self.config.dbms {
            args.push("--dbms".to_string());
            args.push(dbms.clone());
        }
        for header in self.config.header_lines() {
            args.push("--header".to_string());
            args.push(header);
        }
        args
    }

    fn target_args(&self, url: &str, post_data: Option<&str>) -> Vec<String> {
        let mut args = vec!["-u".to_string(), url.to_string()];
        if let Some(data) = post_data {
            args.push("--data".to_string());
            args.push(data.to_string());
        }
        args.push("--level".to_string());
        args.push(self.config.level.to_string());
        args.push("--risk".to_string());
        args.push(self.config.risk.to_string());
        args.extend(self.common_args());
        args
    }

    /// Crawls the target. Watches stdout for the completion line, shuts the
    /// tool down gracefully, then polls the working directory for the
    /// results CSV. Emits `crawler:finished` or `crawler:failed`.
    pub async fn run_crawl(&self) -> Result<Option<PathBuf>, ScanError> {
        tokio::fs::create_dir_all(&self.config.tmp_dir).await?;

        let mut args = vec![
            "-u".to_string(),
            self.config.target_url.clone(),
            "--crawl".to_string(),
            self.config.crawl_depth.to_string(),
            "--forms".to_string(),
        ];
        args.extend(self.common_args());

        let logger = self.logger.clone();
        let mut on_line = move |line: &str| -> bool {
            log_tool_line(&logger, line);
            CRAWL_DONE_RE.is_match(line)
        };

        let outcome = self
            .run_with_fallback("crawl", &args, &mut on_line)
            .await?;
        if outcome.cancelled {
            return Err(ScanError::Cancelled);
        }
        if outcome.timed_out {
            self.logger.log(
                &format!(
                    "Crawler superó el tiempo límite de {}s; intentando recuperar resultados",
                    self.config.tool_timeout_secs
                ),
                LogLevel::Warning,
            );
        }

        match self.poll_for_csv().await {
            Some(csv_path) => {
                self.logger.log(
                    &format!("Crawler finalizado, resultados en {}", csv_path.display()),
                    LogLevel::Success,
                );
                self.bus.publish(ScanEvent::CrawlerFinished {
                    scan_id: self.scan_id.clone(),
                    csv_path: csv_path.display().to_string(),
                });
                Ok(Some(csv_path))
            }
            None => {
                self.bus.publish(ScanEvent::CrawlerFailed {
                    scan_id: self.scan_id.clone(),
                    message: "no se encontró el CSV de resultados del crawler".to_string(),
                });
                Ok(None)
            }
        }
    }

    /// Looks for a recent results CSV in the working directory, retrying a
    /// bounded number of times. Candidates older than an hour are ignored.
    pub(crate) async fn poll_for_csv(&self) -> Option<PathBuf> {
        for attempt in 0..CSV_POLL_ATTEMPTS {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(path) = self.find_latest_csv() {
                return Some(path);
            }
            if attempt + 1 < CSV_POLL_ATTEMPTS {
                tokio::time::sleep(CSV_POLL_DELAY).await;
            }
        }
        None
    }

    fn find_latest_csv(&self) -> Option<PathBuf> {
        let pattern = self.config.tmp_dir.join("**").join("*.csv");
        let entries = glob::glob(pattern.to_str()?).ok()?;
        let now = std::time::SystemTime::now();
        entries
            .flatten()
            .filter_map(|path| {
                let modified = path.metadata().ok()?.modified().ok()?;
                let age = now.duration_since(modified).unwrap_or_default();
                if age <= CSV_MAX_AGE {
                    Some((modified, path))
                } else {
                    None
                }
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, path)| path)
    }

    /// Tests one endpoint, optionally restricted to a parameter list. At most
    /// one finding per `(endpoint, parameter)` is reported per invocation.
    pub async fn test_endpoint<F>(
        &self,
        endpoint: &Endpoint,
        params: &[String],
        phase: SqliPhase,
        mut on_finding: F,
    ) -> Result<usize, ScanError>
    where
        F: FnMut(Vulnerability),
    {
        let mut args = self.target_args(&endpoint.url, endpoint.post_data.as_deref());
        if !params.is_empty() {
            args.push("-p".to_string());
            args.push(params.join(","));
        }
        args.extend(phase.extra_args().iter().map(|a| a.to_string()));

        let logger = self.logger.clone();
        let endpoint_url = endpoint.url.clone();
        let params_owned: Vec<String> = params.to_vec();
        let mut reported: HashSet<String> = HashSet::new();
        let mut findings: Vec<Vulnerability> = Vec::new();

        {
            let findings = &mut findings;
            let reported = &mut reported;
            let mut on_line = move |line: &str| -> bool {
                log_tool_line(&logger, line);
                if !VULNERABLE_RE.is_match(line) {
                    return false;
                }
                match attribute_parameter(line, &params_owned) {
                    Some(param) => {
                        if reported.insert(param.clone()) {
                            findings.push(Vulnerability {
                                kind: VulnKind::Sqli,
                                severity: Severity::Critical,
                                endpoint: endpoint_url.clone(),
                                parameter: param,
                                description: line.trim().to_string(),
                            });
                        }
                    }
                    None => {
                        // A vulnerable-looking line naming no known parameter
                        // cannot be keyed; drop it.
                        logger.log_with(
                            &format!("sqlmap: línea sin parámetro atribuible: {}", line.trim()),
                            LogLevel::Debug,
                            None,
                            true,
                        );
                    }
                }
                false
            };

            let name = format!("test-{}", phase.as_str());
            let outcome = self.run_with_fallback(&name, &args, &mut on_line).await?;
            if outcome.cancelled {
                return Err(ScanError::Cancelled);
            }
            if outcome.timed_out {
                self.logger.log(
                    &format!(
                        "sqlmap ({}) superó el tiempo límite de {}s en {}",
                        phase.as_str(),
                        self.config.tool_timeout_secs,
                        endpoint.url
                    ),
                    LogLevel::Warning,
                );
            }
        }

        let count = findings.len();
        for finding in findings {
            on_finding(finding);
        }
        Ok(count)
    }

    /// Single-parameter variant used by the fingerprint and exploit
    /// sub-phases.
    pub async fn test_parameter<F>(
        &self,
        parameter: &Parameter,
        post_data: Option<&str>,
        phase: SqliPhase,
        on_finding: F,
    ) -> Result<usize, ScanError>
    where
        F: FnMut(Vulnerability),
    {
        let mut endpoint = Endpoint::new(parameter.endpoint_url.clone(), parameter.method);
        endpoint.post_data = post_data.map(str::to_string);
        self.test_endpoint(&endpoint, &[parameter.name.clone()], phase, on_finding)
            .await
    }

    /// One invocation, retried once through the shell on a non-zero exit.
    /// The retry never re-enters after a stop or a termination we requested.
    async fn run_with_fallback<F>(
        &self,
        kind: &str,
        args: &[String],
        on_line: &mut F,
    ) -> Result<RunOutcome, ScanError>
    where
        F: FnMut(&str) -> bool,
    {
        let plan = SpawnPlan::resolve(&self.config.sqlmap_path, args);
        let outcome = self.run_streaming(kind, &plan, on_line).await?;
        if outcome.exit_success || outcome.terminated || outcome.timed_out || outcome.cancelled {
            return Ok(outcome);
        }

        self.logger.log_with(
            "spawn: reintentando la invocación a través de la shell",
            LogLevel::Debug,
            None,
            true,
        );
        let fallback = SpawnPlan::shell_fallback(&self.config.sqlmap_path, args, cfg!(windows));
        self.run_streaming(kind, &fallback, on_line).await
    }

    async fn run_streaming<F>(
        &self,
        kind: &str,
        plan: &SpawnPlan,
        on_line: &mut F,
    ) -> Result<RunOutcome, ScanError>
    where
        F: FnMut(&str) -> bool,
    {
        self.logger
            .log(&format!("spawn: {}", plan.display()), LogLevel::Debug);

        let mut cmd = plan.command();
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        let mut child = cmd
            .spawn()
            .map_err(|e| ScanError::Spawn(format!("{}: {}", plan.program, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScanError::Spawn("no stdout handle".into()))?;

        let seq = self.invocation_seq.fetch_add(1, Ordering::SeqCst);
        let process_name = format!("sqlmap:{}:{}", kind, seq);
        self.registry.insert(&process_name, child);

        let mut lines = BufReader::new(stdout).lines();
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.tool_timeout_secs);
        let mut outcome = RunOutcome::default();

        loop {
            let next = tokio::select! {
                line = lines.next_line() => line,
                _ = tokio::time::sleep_until(deadline) => {
                    outcome.timed_out = true;
                    break;
                }
                _ = self.cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
            };
            match next {
                Ok(Some(line)) => {
                    if on_line(&line) {
                        outcome.terminated = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if let Some(mut child) = self.registry.remove(&process_name) {
            if outcome.terminated || outcome.timed_out || outcome.cancelled {
                terminate_gracefully(&mut child, TERM_GRACE).await;
            } else {
                outcome.exit_success = child
                    .wait()
                    .await
                    .map(|status| status.success())
                    .unwrap_or(false);
            }
        }

        Ok(outcome)
    }
}

/// Routes one tool output line into the scan log: noise goes console-only at
/// debug, warnings keep their level, everything else lands at info.
fn log_tool_line(logger: &ScanLogger, line: &str) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    if NOISE_RE.is_match(trimmed) {
        logger.log_with(trimmed, LogLevel::Debug, None, true);
        return;
    }
    let level = if trimmed.contains("[CRITICAL]") || trimmed.contains("[ERROR]") {
        LogLevel::Warning
    } else if trimmed.contains("[WARNING]") {
        LogLevel::Warning
    } else {
        LogLevel::Info
    };
    logger.log(trimmed, level);
}

/// Finds which tested parameter a vulnerable line refers to, either by a
/// `Parameter:` header or by name substring.
fn attribute_parameter(line: &str, params: &[String]) -> Option<String> {
    if let Some(captures) = PARAM_HEADER_RE.captures(line) {
        let name = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        if let Some(param) = params.iter().find(|p| p.as_str() == name) {
            return Some(param.clone());
        }
    }
    params.iter().find(|p| line.contains(p.as_str())).cloned()
}
