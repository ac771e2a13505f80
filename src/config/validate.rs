use super::schema::SCAN_CONFIG_SCHEMA;
use super::types::{RawScanConfig, ScanConfig};
use crate::errors::ScanError;

const DEFAULT_CRAWL_DEPTH: i64 = 2;
const DEFAULT_LEVEL: i64 = 1;
const DEFAULT_RISK: i64 = 1;
const DEFAULT_THREADS: i64 = 1;
const DEFAULT_TOOL_TIMEOUT_SECS: i64 = 300;
const DEFAULT_XSS_WORKERS: i64 = 10;

/// Checks that a target parses as an absolute http/https URL with a host.
fn is_absolute_http_url(url: &str) -> bool {
    let rest = match url.strip_prefix("https://").or_else(|| url.strip_prefix("http://")) {
        Some(rest) => rest,
        None => return false,
    };
    let host = rest.split('/').next().unwrap_or("");
    !host.is_empty()
}

/// Parses a newline-delimited `Name: Value` list. Malformed lines are dropped.
fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn clamp(value: Option<i64>, default: i64, min: i64, max: i64) -> i64 {
    value.unwrap_or(default).clamp(min, max)
}

/// Validates and normalizes a raw scan request. Structural problems and an
/// unusable target are rejected; out-of-range numerics are clamped to the
/// nearest valid endpoint.
pub fn validate(raw_value: &serde_json::Value) -> Result<ScanConfig, ScanError> {
    let validator = jsonschema::JSONSchema::compile(&SCAN_CONFIG_SCHEMA)
        .map_err(|e| ScanError::Internal(format!("config schema failed to compile: {}", e)))?;
    if !validator.is_valid(raw_value) {
        return Err(ScanError::Config(
            "scan request does not match the expected shape".into(),
        ));
    }

    let raw: RawScanConfig = serde_json::from_value(raw_value.clone())?;

    let target_url = raw
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ScanError::Config("missing target URL".into()))?;
    if !is_absolute_http_url(target_url) {
        return Err(ScanError::InvalidTarget(format!(
            "target must be an absolute http/https URL: {}",
            target_url
        )));
    }

    if !raw.flags.sqli && !raw.flags.xss {
        return Err(ScanError::Config(
            "at least one scanner (sqli, xss) must be enabled".into(),
        ));
    }

    let sqlmap_path = raw
        .sqlmap_path
        .filter(|p| !p.is_empty())
        .or_else(|| std::env::var("EASYINJECTION_SQLMAP_PATH").ok())
        .unwrap_or_else(|| "sqlmap".to_string());
    let dalfox_path = raw
        .dalfox_path
        .filter(|p| !p.is_empty())
        .or_else(|| std::env::var("EASYINJECTION_DALFOX_PATH").ok())
        .unwrap_or_else(|| "dalfox".to_string());

    let tmp_dir = raw
        .tmp_dir
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("easyinjection_sqlmap_tmp"));
    let output_dir = raw
        .output_dir
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("easyinjection_scans"));

    Ok(ScanConfig {
        target_url: target_url.to_string(),
        flags: raw.flags,
        dbms: raw.dbms.filter(|d| !d.is_empty()),
        crawl_depth: clamp(raw.crawl_depth, DEFAULT_CRAWL_DEPTH, 1, 5) as u8,
        level: clamp(raw.level, DEFAULT_LEVEL, 1, 5) as u8,
        risk: clamp(raw.risk, DEFAULT_RISK, 1, 3) as u8,
        threads: clamp(raw.threads, DEFAULT_THREADS, 1, i64::from(u32::MAX)) as u32,
        tool_timeout_secs: clamp(raw.tool_timeout_secs, DEFAULT_TOOL_TIMEOUT_SECS, 1, i64::MAX) as u64,
        xss_workers: clamp(raw.xss_workers, DEFAULT_XSS_WORKERS, 1, i64::from(u32::MAX)) as u32,
        xss_delay_ms: clamp(raw.xss_delay_ms, 0, 0, i64::MAX) as u64,
        enable_exploitation: raw.enable_exploitation,
        headers: raw.headers.as_deref().map(parse_headers).unwrap_or_default(),
        sqlmap_path,
        dalfox_path,
        tmp_dir,
        output_dir,
    })
}
