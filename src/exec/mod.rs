pub mod csv;
pub mod dalfox;
pub mod jsonstream;
pub mod spawn;
pub mod sqlmap;

pub use csv::{parse_crawl_csv, parse_crawl_csv_file, write_targets_files, CrawlResult};
pub use dalfox::DalfoxExecutor;
pub use jsonstream::JsonObjectStream;
pub use spawn::{ProcessRegistry, SpawnPlan};
pub use sqlmap::{SqliPhase, SqlmapExecutor};

use std::process::Stdio;
use std::time::Duration;

use crate::errors::ScanError;

/// Runs `<tool> --version` with a short timeout and returns the first output
/// line.
pub(crate) async fn probe_version(
    tool_path: &str,
    timeout: Duration,
) -> Result<String, ScanError> {
    let plan = SpawnPlan::resolve(tool_path, &["--version".to_string()]);
    let mut cmd = plan.command();
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let child = cmd
        .spawn()
        .map_err(|e| ScanError::Spawn(format!("{}: {}", tool_path, e)))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ScanError::Timeout(format!("{} --version", tool_path)))?
        .map_err(ScanError::Io)?;

    if !output.status.success() {
        return Err(ScanError::ToolUnavailable(format!(
            "{} exited with {}",
            tool_path, output.status
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or("").trim().to_string())
}
