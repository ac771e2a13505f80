use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which scanner families this scan runs. At least one must be enabled.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct ScannerFlags {
    #[serde(default)]
    pub sqli: bool,
    #[serde(default)]
    pub xss: bool,
}

/// Raw scan request as it arrives over the wire, before validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawScanConfig {
    pub url: Option<String>,
    #[serde(default)]
    pub flags: ScannerFlags,
    pub dbms: Option<String>,
    pub crawl_depth: Option<i64>,
    pub level: Option<i64>,
    pub risk: Option<i64>,
    pub threads: Option<i64>,
    pub tool_timeout_secs: Option<i64>,
    pub xss_workers: Option<i64>,
    pub xss_delay_ms: Option<i64>,
    #[serde(default)]
    pub enable_exploitation: bool,
    /// Newline-delimited `Name: Value` list.
    pub headers: Option<String>,
    pub sqlmap_path: Option<String>,
    pub dalfox_path: Option<String>,
    pub tmp_dir: Option<String>,
    pub output_dir: Option<String>,
}

/// Normalized scan configuration. Immutable after validation.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub target_url: String,
    pub flags: ScannerFlags,
    pub dbms: Option<String>,
    pub crawl_depth: u8,
    pub level: u8,
    pub risk: u8,
    pub threads: u32,
    pub tool_timeout_secs: u64,
    pub xss_workers: u32,
    pub xss_delay_ms: u64,
    pub enable_exploitation: bool,
    pub headers: Vec<(String, String)>,
    pub sqlmap_path: String,
    pub dalfox_path: String,
    /// Working directory for the SQLi tool, reused across scans.
    pub tmp_dir: PathBuf,
    /// Base directory under which per-scan output directories are created.
    pub output_dir: PathBuf,
}

impl ScanConfig {
    /// Per-scan output directory holding targets files and tool output.
    pub fn scan_dir(&self, scan_id: &str) -> PathBuf {
        self.output_dir.join(format!("scan_{}", scan_id))
    }

    /// Header list rendered back to `Name: Value` lines for tool CLIs.
    pub fn header_lines(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect()
    }
}
