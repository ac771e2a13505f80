mod discovery;
mod sqli;
mod xss;

use crate::errors::ScanError;
use crate::orchestrator::ScanOrchestrator;

impl ScanOrchestrator {
    /// The gate sequence run before a phase or sub-phase does real work:
    /// honor an outstanding pause, ask the theory question for the tag, then
    /// honor any pause issued while the question was open.
    pub(crate) async fn gate_on(&self, phase_tag: &str) -> Result<(), ScanError> {
        self.gate().wait_if_paused().await;
        self.check_stopped()?;
        if let Some(result) = self.gate().ask_tag(phase_tag).await? {
            self.record_question(result);
        }
        self.gate().wait_if_paused().await;
        self.check_stopped()
    }
}
