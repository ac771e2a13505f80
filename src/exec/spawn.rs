use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Grace period between SIGTERM and SIGKILL.
pub const TERM_GRACE: Duration = Duration::from_millis(300);

/// How a tool gets invoked on this host. The decision is pure so it can be
/// unit-tested against fixtures for both platforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnPlan {
    pub program: String,
    pub args: Vec<String>,
}

impl SpawnPlan {
    pub fn resolve(tool_path: &str, args: &[String]) -> Self {
        Self::resolve_for(tool_path, args, cfg!(windows))
    }

    /// Bare command names on Windows resolve through the shell; `.py` tools
    /// get a platform interpreter prepended; everything else runs directly.
    pub fn resolve_for(tool_path: &str, args: &[String], windows: bool) -> Self {
        if tool_path.ends_with(".py") {
            let interpreter = if windows { "python" } else { "python3" };
            let mut full = vec![tool_path.to_string()];
            full.extend(args.iter().cloned());
            return Self {
                program: interpreter.to_string(),
                args: full,
            };
        }

        let has_separator = tool_path.contains('/') || tool_path.contains('\\');
        if !has_separator && windows {
            let mut full = vec!["/C".to_string(), tool_path.to_string()];
            full.extend(args.iter().cloned());
            return Self {
                program: "cmd".to_string(),
                args: full,
            };
        }

        Self {
            program: tool_path.to_string(),
            args: args.to_vec(),
        }
    }

    /// Secondary attempt used after a non-zero exit: the whole invocation is
    /// quoted into a single shell command line.
    pub fn shell_fallback(tool_path: &str, args: &[String], windows: bool) -> Self {
        let mut line = shell_quote(tool_path);
        for arg in args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        if windows {
            Self {
                program: "cmd".to_string(),
                args: vec!["/C".to_string(), line],
            }
        } else {
            Self {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), line],
            }
        }
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Sends SIGTERM, waits out the grace period, then falls back to SIGKILL.
/// On non-unix hosts the kill is immediate.
pub async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Every live child process of one scan, keyed by invocation name. Owned by
/// the orchestrator task; `stop()` drains it.
pub struct ProcessRegistry {
    processes: Mutex<HashMap<String, Child>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, name: &str, child: Child) {
        self.processes.lock().unwrap().insert(name.to_string(), child);
    }

    pub fn remove(&self, name: &str) -> Option<Child> {
        self.processes.lock().unwrap().remove(name)
    }

    pub fn len(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.lock().unwrap().is_empty()
    }

    /// Terminates and drains every tracked process.
    pub async fn kill_all(&self) {
        let drained: Vec<(String, Child)> = {
            let mut processes = self.processes.lock().unwrap();
            processes.drain().collect()
        };
        for (name, mut child) in drained {
            debug!(process = %name, "Terminating tracked process");
            terminate_gracefully(&mut child, TERM_GRACE).await;
        }
    }

    /// Waits for the registry to drain on its own, up to `cap`. Stragglers
    /// are logged at warning and left for the OS to reap.
    pub async fn wait_all(&self, cap: Duration) {
        let deadline = tokio::time::Instant::now() + cap;
        while !self.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                let names: Vec<String> = self
                    .processes
                    .lock()
                    .unwrap()
                    .keys()
                    .cloned()
                    .collect();
                warn!(stragglers = ?names, "Processes still running at wait cap");
                self.processes.lock().unwrap().clear();
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
