use std::collections::BTreeSet;

use crate::errors::ScanError;
use crate::models::LogLevel;
use crate::orchestrator::state::PhaseName;
use crate::orchestrator::ScanOrchestrator;

impl ScanOrchestrator {
    /// XSS phase: context and payload walkthroughs are educational (log
    /// output only); fuzzing drives the scanner over every unique endpoint
    /// that carries a testable parameter.
    pub(crate) async fn run_xss_phase(&self) -> Result<(), ScanError> {
        self.gate_on("xss-context").await?;
        self.begin_sub_phase(PhaseName::Xss, "context");
        self.logger().log(
            "Analizando contextos de inyección: HTML, atributos y JavaScript",
            LogLevel::Info,
        );
        self.logger().log(
            "Cada contexto exige una vía de escape distinta; el fuzzing las cubre automáticamente",
            LogLevel::Info,
        );
        self.complete_sub_phase(PhaseName::Xss, "context", None);

        self.gate().wait_if_paused().await;
        self.check_stopped()?;
        self.begin_sub_phase(PhaseName::Xss, "payload");
        self.logger().log(
            "Preparando el diccionario de payloads del escáner XSS",
            LogLevel::Info,
        );
        self.complete_sub_phase(PhaseName::Xss, "payload", None);

        self.gate().wait_if_paused().await;
        self.check_stopped()?;
        self.begin_sub_phase(PhaseName::Xss, "fuzzing");

        let urls: BTreeSet<String> = self
            .discovered_parameters()
            .into_iter()
            .filter(|p| p.testable)
            .map(|p| p.endpoint_url)
            .collect();
        self.logger().log(
            &format!("Fuzzing XSS sobre {} endpoints", urls.len()),
            LogLevel::Info,
        );

        for url in urls {
            self.gate().wait_if_paused().await;
            self.check_stopped()?;

            self.count_request();
            let outcome = self
                .dalfox()
                .scan_url(&url, |v| {
                    self.add_vulnerability(v);
                })
                .await;
            match outcome {
                Ok(found) if found > 0 => self.logger().log(
                    &format!("{}: {} hallazgos XSS", url, found),
                    LogLevel::Success,
                ),
                Ok(_) => {}
                Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                Err(e) => {
                    self.logger()
                        .log(&format!("Fallo en el fuzzing de {}: {}", url, e), LogLevel::Error);
                }
            }
        }

        self.complete_sub_phase(PhaseName::Xss, "fuzzing", None);
        Ok(())
    }
}
