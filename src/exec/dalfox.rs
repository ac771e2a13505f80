use regex::Regex;
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::ScanConfig;
use crate::errors::ScanError;
use crate::exec::jsonstream::JsonObjectStream;
use crate::exec::spawn::{terminate_gracefully, ProcessRegistry, SpawnPlan, TERM_GRACE};
use crate::logging::ScanLogger;
use crate::models::{LogLevel, Severity, Vulnerability, VulnKind};

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"]+"#).unwrap());

/// Stderr lines the tool emits on every run that carry no signal.
fn is_benign_stderr(line: &str) -> bool {
    line.is_empty()
        || line.contains("Loopback")
        || line.contains("IPAddressSpace")
        || line.contains("could not unmarshal event")
}

fn severity_of(object: &serde_json::Value) -> Severity {
    match object
        .get("severity")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_ascii_lowercase()
        .as_str()
    {
        "critical" | "high" => Severity::High,
        "medium" => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Endpoint of a finding, tried in order: `data` as a string, `data.url`,
/// `data.target`, `url`, then any URL inside the serialized object.
fn endpoint_of(object: &serde_json::Value, fallback: &str) -> String {
    if let Some(data) = object.get("data") {
        if let Some(s) = data.as_str() {
            return s.to_string();
        }
        for key in ["url", "target"] {
            if let Some(s) = data.get(key).and_then(|v| v.as_str()) {
                return s.to_string();
            }
        }
    }
    if let Some(s) = object.get("url").and_then(|v| v.as_str()) {
        return s.to_string();
    }
    let serialized = object.to_string();
    if let Some(m) = URL_RE.find(&serialized) {
        return m.as_str().to_string();
    }
    fallback.to_string()
}

fn truncated(payload: &str, max: usize) -> String {
    if payload.chars().count() <= max {
        payload.to_string()
    } else {
        let cut: String = payload.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// Builds a finding from one parsed output object, or `None` when the object
/// is not a vulnerability report.
fn finding_from_object(object: &serde_json::Value, scanned_url: &str) -> Option<Vulnerability> {
    let kind = object.get("type").and_then(|t| t.as_str())?;
    if !matches!(kind, "V" | "POC" | "VULN") {
        return None;
    }
    let param = object
        .get("param")
        .and_then(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("unknown");
    let payload = object
        .get("payload")
        .and_then(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("detected");
    let method = object
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or("GET");
    let inject_type = object
        .get("inject_type")
        .and_then(|i| i.as_str())
        .unwrap_or("reflected");

    Some(Vulnerability {
        kind: VulnKind::Xss,
        severity: severity_of(object),
        endpoint: endpoint_of(object, scanned_url),
        parameter: param.to_string(),
        description: format!(
            "XSS {} en parámetro '{}' ({}): payload {}",
            method,
            param,
            inject_type,
            truncated(payload, 80)
        ),
    })
}

/// Supervises the XSS scanner: one process per URL, JSON-object stdout
/// stream, per-invocation duplicate suppression by `(param, payload)`.
pub struct DalfoxExecutor {
    config: Arc<ScanConfig>,
    logger: Arc<ScanLogger>,
    registry: Arc<ProcessRegistry>,
    cancel: CancellationToken,
}

impl DalfoxExecutor {
    pub fn new(
        config: Arc<ScanConfig>,
        logger: Arc<ScanLogger>,
        registry: Arc<ProcessRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            logger,
            registry,
            cancel,
        }
    }

    pub async fn check_availability(&self) -> bool {
        match super::probe_version(&self.config.dalfox_path, Duration::from_secs(10)).await {
            Ok(version) => {
                self.logger
                    .log(&format!("XSS scanner disponible: {}", version), LogLevel::Info);
                true
            }
            Err(e) => {
                self.logger.log(
                    &format!("XSS scanner no disponible ({}): {}", self.config.dalfox_path, e),
                    LogLevel::Warning,
                );
                false
            }
        }
    }

    fn scan_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "url".to_string(),
            url.to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--silence".to_string(),
            "--no-color".to_string(),
            "--skip-bav".to_string(),
            "--worker".to_string(),
            self.config.xss_workers.to_string(),
        ];
        if self.config.xss_delay_ms > 0 {
            args.push("--delay".to_string());
            args.push(self.config.xss_delay_ms.to_string());
        }
        for header in self.config.header_lines() {
            args.push("--header".to_string());
            args.push(header);
        }
        args
    }

    /// Scans one URL, invoking `on_finding` for every deduplicated finding.
    /// A timeout terminates the process and resolves with whatever was
    /// already collected.
    pub async fn scan_url<F>(&self, url: &str, mut on_finding: F) -> Result<usize, ScanError>
    where
        F: FnMut(Vulnerability),
    {
        let args = self.scan_args(url);
        let plan = SpawnPlan::resolve(&self.config.dalfox_path, &args);
        self.logger
            .log(&format!("spawn: {}", plan.display()), LogLevel::Debug);

        let mut cmd = plan.command();
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| ScanError::Spawn(format!("{}: {}", self.config.dalfox_path, e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScanError::Spawn("no stdout handle".into()))?;
        let stderr = child.stderr.take();

        let process_name = format!("dalfox:{}", url);
        self.registry.insert(&process_name, child);

        // Stderr is drained concurrently; real errors surface as warnings.
        let stderr_task = stderr.map(|stderr| {
            let logger = self.logger.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim().to_string();
                    if is_benign_stderr(&line) {
                        continue;
                    }
                    if line.contains("ERROR:") || line.contains("FATAL:") {
                        logger.log(&line, LogLevel::Warning);
                    }
                }
            })
        });

        let mut stream = JsonObjectStream::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut found = 0usize;
        let mut buf = [0u8; 8192];
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.tool_timeout_secs);
        let mut timed_out = false;
        let mut cancelled = false;

        loop {
            let read = tokio::select! {
                read = stdout.read(&mut buf) => read,
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
            };
            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            for object in stream.feed(&buf[..n]) {
                let Some(finding) = finding_from_object(&object, url) else {
                    continue;
                };
                let key = (
                    finding.parameter.clone(),
                    object
                        .get("payload")
                        .and_then(|p| p.as_str())
                        .unwrap_or("detected")
                        .to_string(),
                );
                if !seen.insert(key) {
                    continue;
                }
                found += 1;
                self.logger.log(
                    &format!(
                        "XSS detectado en {} parámetro '{}'",
                        finding.endpoint, finding.parameter
                    ),
                    LogLevel::Success,
                );
                on_finding(finding);
            }
        }

        if let Some(mut child) = self.registry.remove(&process_name) {
            if timed_out || cancelled {
                terminate_gracefully(&mut child, TERM_GRACE).await;
            } else {
                let _ = child.wait().await;
            }
        }
        if let Some(task) = stderr_task {
            task.abort();
        }
        if timed_out {
            self.logger.log(
                &format!(
                    "XSS scan de {} superó el tiempo límite de {}s",
                    url, self.config.tool_timeout_secs
                ),
                LogLevel::Warning,
            );
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_finding_from_vuln_object() {
        let object = json!({
            "type": "V",
            "param": "q",
            "payload": "<script>alert(1)</script>",
            "severity": "high",
            "method": "GET",
            "inject_type": "inHTML-URL",
            "data": "http://site.test/search?q=<script>"
        });
        let finding = finding_from_object(&object, "http://site.test/").unwrap();
        assert_eq!(finding.kind, VulnKind::Xss);
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.endpoint, "http://site.test/search?q=<script>");
        assert_eq!(finding.parameter, "q");
        assert!(finding.description.contains("inHTML-URL"));
    }

    #[test]
    fn test_info_object_ignored() {
        let object = json!({ "type": "INFO", "param": "q" });
        assert!(finding_from_object(&object, "http://x/").is_none());
    }

    #[test]
    fn test_severity_mapping() {
        for (input, expected) in [
            ("critical", Severity::High),
            ("high", Severity::High),
            ("medium", Severity::Medium),
            ("low", Severity::Low),
            ("", Severity::Low),
        ] {
            let object = json!({ "type": "V", "severity": input });
            assert_eq!(finding_from_object(&object, "http://x/").unwrap().severity, expected);
        }
    }

    #[test]
    fn test_endpoint_fallback_chain() {
        let nested = json!({ "type": "V", "data": { "target": "http://a/t" } });
        assert_eq!(endpoint_of(&nested, "http://fb/"), "http://a/t");

        let top_url = json!({ "type": "V", "url": "http://b/u" });
        assert_eq!(endpoint_of(&top_url, "http://fb/"), "http://b/u");

        let regex_only = json!({ "type": "V", "message": "found at http://c/page?x=1 level 2" });
        assert_eq!(endpoint_of(&regex_only, "http://fb/"), "http://c/page?x=1");

        let nothing = json!({ "type": "V" });
        assert_eq!(endpoint_of(&nothing, "http://fb/"), "http://fb/");
    }

    #[test]
    fn test_missing_param_and_payload_defaults() {
        let object = json!({ "type": "POC" });
        let finding = finding_from_object(&object, "http://x/").unwrap();
        assert_eq!(finding.parameter, "unknown");
        assert!(finding.description.contains("detected"));
    }

    #[test]
    fn test_benign_stderr_lines() {
        assert!(is_benign_stderr(""));
        assert!(is_benign_stderr("ERROR: Loopback address detected"));
        assert!(is_benign_stderr("could not unmarshal event: x"));
        assert!(!is_benign_stderr("FATAL: scanner crashed"));
    }

    #[test]
    fn test_payload_truncation() {
        let long = "x".repeat(200);
        let object = json!({ "type": "V", "payload": long });
        let finding = finding_from_object(&object, "http://x/").unwrap();
        assert!(finding.description.len() < 200);
        assert!(finding.description.ends_with("..."));
    }
}
