use regex::Regex;
use std::sync::{Arc, LazyLock, Mutex};
use tracing::{debug, error, info, warn};

use crate::events::{EventBus, ScanEvent};
use crate::models::{LogEntry, LogLevel};

/// Tool banner and version noise. The scanners print ASCII art, version
/// strings and a legal disclaimer on every start; none of it belongs in the
/// user-visible log.
static BANNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)sqlmap/\d|dalfox v?\d|legal disclaimer|usage of sqlmap|starting @|ending @|^\s*[_.\\/|~\-]{5,}\s*$").unwrap()
});

/// Interactive prompts the tools would print when run without --batch.
static PROMPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[y/n\]|\[y/n/q\]|\(y/n\)").unwrap());

/// The gate publishes its own question:result event; the tool-side echo of
/// the answer outcome would duplicate it.
static GATE_ECHO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)respuesta (correcta|incorrecta).*continuando escaneo").unwrap()
});

/// Timestamped, phase-tagged log sink for one scan. Entries that survive the
/// noise filters are appended to an append-only buffer and published on the
/// event bus as `log:added`; the console (tracing) sink receives everything.
pub struct ScanLogger {
    scan_id: String,
    bus: Arc<EventBus>,
    entries: Mutex<Vec<LogEntry>>,
    current_phase: Mutex<String>,
}

impl ScanLogger {
    pub fn new(scan_id: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            scan_id: scan_id.into(),
            bus,
            entries: Mutex::new(Vec::new()),
            current_phase: Mutex::new("init".to_string()),
        }
    }

    pub fn set_phase(&self, tag: &str) {
        *self.current_phase.lock().unwrap() = tag.to_string();
    }

    pub fn log(&self, message: &str, level: LogLevel) {
        self.log_with(message, level, None, false);
    }

    pub fn log_with(&self, message: &str, level: LogLevel, phase: Option<&str>, console_only: bool) {
        self.console(message, level);

        if console_only || Self::is_filtered(message, level) {
            return;
        }

        let phase = phase
            .map(str::to_string)
            .unwrap_or_else(|| self.current_phase.lock().unwrap().clone());
        let entry = LogEntry {
            timestamp: chrono::Utc::now(),
            level,
            message: message.to_string(),
            phase,
        };
        self.entries.lock().unwrap().push(entry.clone());
        self.bus.publish(ScanEvent::LogAdded {
            scan_id: self.scan_id.clone(),
            entry,
        });
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap();
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    pub fn all(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn console(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Debug => debug!(scan_id = %self.scan_id, "{}", message),
            LogLevel::Info | LogLevel::Success => info!(scan_id = %self.scan_id, "{}", message),
            LogLevel::Warning => warn!(scan_id = %self.scan_id, "{}", message),
            LogLevel::Error => error!(scan_id = %self.scan_id, "{}", message),
        }
    }

    fn is_filtered(message: &str, level: LogLevel) -> bool {
        if BANNER_RE.is_match(message) || PROMPT_RE.is_match(message) || GATE_ECHO_RE.is_match(message) {
            return true;
        }
        if level == LogLevel::Debug {
            let trimmed = message.trim_start();
            if trimmed.starts_with("spawn:") || trimmed.starts_with("sqlmap:") {
                return true;
            }
        }
        false
    }
}
