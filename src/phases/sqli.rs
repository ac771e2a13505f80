use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::errors::ScanError;
use crate::exec::SqliPhase;
use crate::models::{Endpoint, HttpMethod, LogLevel, Parameter, Vulnerability, VulnKind};
use crate::orchestrator::state::PhaseName;
use crate::orchestrator::ScanOrchestrator;

/// Injection technique names recognizable in finding descriptions.
static TECHNIQUE_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("boolean-based", Regex::new(r"(?i)boolean").unwrap()),
        ("union-based", Regex::new(r"(?i)union").unwrap()),
        ("time-based", Regex::new(r"(?i)time").unwrap()),
        ("error-based", Regex::new(r"(?i)error").unwrap()),
    ]
});

impl ScanOrchestrator {
    /// SQLi phase: detection over every discovered endpoint, then
    /// fingerprint, technique analysis and (optionally) exploitation on the
    /// first confirmed injection point.
    pub(crate) async fn run_sqli_phase(&self) -> Result<(), ScanError> {
        self.run_sqli_detection().await?;
        self.run_sqli_fingerprint().await?;
        self.run_sqli_technique().await?;
        self.run_sqli_exploit().await?;
        Ok(())
    }

    async fn run_sqli_detection(&self) -> Result<(), ScanError> {
        self.gate_on("sqli-detection").await?;
        self.begin_sub_phase(PhaseName::Sqli, "detection");

        let groups = self.testable_parameter_groups();
        self.logger().log(
            &format!("Probando inyección SQL en {} endpoints", groups.len()),
            LogLevel::Info,
        );

        for (endpoint, params) in groups {
            self.gate().wait_if_paused().await;
            self.check_stopped()?;

            self.count_request();
            let outcome = self
                .sqlmap()
                .test_endpoint(&endpoint, &params, SqliPhase::Detection, |v| {
                    self.add_vulnerability(v);
                })
                .await;
            match outcome {
                Ok(found) if found > 0 => self.logger().log(
                    &format!("{}: {} parámetros inyectables", endpoint.url, found),
                    LogLevel::Success,
                ),
                Ok(_) => {}
                Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                Err(e) => {
                    // One endpoint failing does not abort the sweep.
                    self.logger().log(
                        &format!("Fallo probando {}: {}", endpoint.url, e),
                        LogLevel::Error,
                    );
                }
            }
        }

        self.complete_sub_phase(PhaseName::Sqli, "detection", None);
        Ok(())
    }

    async fn run_sqli_fingerprint(&self) -> Result<(), ScanError> {
        self.gate_on("sqli-fingerprint").await?;
        self.begin_sub_phase(PhaseName::Sqli, "fingerprint");

        match self.first_sqli_target() {
            Some((parameter, post_data)) => {
                self.gate().wait_if_paused().await;
                self.check_stopped()?;
                self.count_request();
                let outcome = self
                    .sqlmap()
                    .test_parameter(&parameter, post_data.as_deref(), SqliPhase::Fingerprint, |v| {
                        self.add_vulnerability(v);
                    })
                    .await;
                match outcome {
                    Ok(_) => {}
                    Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                    Err(e) => self.logger().log(
                        &format!("Fallo en fingerprint: {}", e),
                        LogLevel::Error,
                    ),
                }
            }
            None => {
                self.logger().log(
                    "Sin inyecciones confirmadas; se omite el fingerprint del DBMS",
                    LogLevel::Info,
                );
            }
        }

        self.complete_sub_phase(PhaseName::Sqli, "fingerprint", None);
        Ok(())
    }

    /// Technique analysis runs no subprocess: it reads the techniques back
    /// out of the recorded finding descriptions.
    async fn run_sqli_technique(&self) -> Result<(), ScanError> {
        self.gate_on("sqli-technique").await?;
        self.begin_sub_phase(PhaseName::Sqli, "technique");

        let findings = self.findings_of_kind(VulnKind::Sqli);
        let techniques = techniques_from_findings(&findings);

        if techniques.is_empty() {
            self.logger().log(
                "No hay técnicas de inyección que analizar",
                LogLevel::Info,
            );
        } else {
            self.logger().log(
                &format!(
                    "Técnicas detectadas: {} (óptima: {})",
                    techniques.join(", "),
                    techniques[0]
                ),
                LogLevel::Success,
            );
        }

        let detail = (!techniques.is_empty()).then(|| {
            serde_json::json!({
                "techniques": &techniques,
                "optimal": &techniques[0],
            })
        });
        self.complete_sub_phase(PhaseName::Sqli, "technique", detail);
        Ok(())
    }

    async fn run_sqli_exploit(&self) -> Result<(), ScanError> {
        self.gate_on("sqli-exploit").await?;
        self.begin_sub_phase(PhaseName::Sqli, "exploit");

        if !self.config().enable_exploitation {
            self.logger().log(
                "Modo seguro: la explotación está deshabilitada para esta sesión",
                LogLevel::Info,
            );
            self.complete_sub_phase(PhaseName::Sqli, "exploit", None);
            return Ok(());
        }

        if let Some((parameter, post_data)) = self.first_sqli_target() {
            self.gate().wait_if_paused().await;
            self.check_stopped()?;
            self.count_request();
            let outcome = self
                .sqlmap()
                .test_parameter(&parameter, post_data.as_deref(), SqliPhase::Exploit, |v| {
                    self.add_vulnerability(v);
                })
                .await;
            match outcome {
                Ok(_) => self.logger().log(
                    &format!(
                        "Explotación de prueba completada sobre '{}'",
                        parameter.name
                    ),
                    LogLevel::Success,
                ),
                Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                Err(e) => self.logger().log(
                    &format!("Fallo en la explotación: {}", e),
                    LogLevel::Error,
                ),
            }
        } else {
            self.logger().log(
                "Sin inyecciones confirmadas; nada que explotar",
                LogLevel::Info,
            );
        }

        self.complete_sub_phase(PhaseName::Sqli, "exploit", None);
        Ok(())
    }

    /// Testable parameters grouped by endpoint identity, with the endpoint
    /// record (and its POST body) resolved from discovery.
    fn testable_parameter_groups(&self) -> Vec<(Endpoint, Vec<String>)> {
        let endpoints = self.discovered_endpoints();
        let mut groups: BTreeMap<(HttpMethod, String), Vec<String>> = BTreeMap::new();
        for parameter in self.discovered_parameters() {
            if !parameter.testable {
                continue;
            }
            groups
                .entry((parameter.method, parameter.endpoint_url.clone()))
                .or_default()
                .push(parameter.name);
        }
        groups
            .into_iter()
            .map(|((method, url), params)| {
                let endpoint = endpoints
                    .iter()
                    .find(|e| e.key() == (method, url.as_str()))
                    .cloned()
                    .unwrap_or_else(|| Endpoint::new(url, method));
                (endpoint, params)
            })
            .collect()
    }

    /// The first confirmed SQLi finding, resolved back to its parameter
    /// record and the endpoint's POST body.
    fn first_sqli_target(&self) -> Option<(Parameter, Option<String>)> {
        let finding = self.findings_of_kind(VulnKind::Sqli).into_iter().next()?;
        let parameters = self.discovered_parameters();
        let parameter = parameters
            .into_iter()
            .find(|p| p.endpoint_url == finding.endpoint && p.name == finding.parameter)
            .unwrap_or(Parameter {
                endpoint_url: finding.endpoint.clone(),
                method: HttpMethod::Get,
                name: finding.parameter.clone(),
                location: crate::models::ParamLocation::Query,
                testable: true,
            });
        let post_data = self
            .discovered_endpoints()
            .iter()
            .find(|e| e.key() == (parameter.method, parameter.endpoint_url.as_str()))
            .and_then(|e| e.post_data.clone());
        Some((parameter, post_data))
    }
}

/// Deduplicated technique list derived from finding descriptions; the first
/// entry is treated as the optimal technique.
fn techniques_from_findings(findings: &[Vulnerability]) -> Vec<String> {
    let mut techniques = Vec::new();
    for (name, pattern) in TECHNIQUE_RES.iter() {
        if findings.iter().any(|f| pattern.is_match(&f.description)) {
            techniques.push(name.to_string());
        }
    }
    techniques
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn finding(description: &str) -> Vulnerability {
        Vulnerability {
            kind: VulnKind::Sqli,
            severity: Severity::Critical,
            endpoint: "http://site.test/a".to_string(),
            parameter: "id".to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_techniques_derived_and_deduplicated() {
        let findings = vec![
            finding("GET parameter 'id' is vulnerable to boolean-based blind"),
            finding("payload worked via UNION query"),
            finding("another boolean-based injection"),
        ];
        let techniques = techniques_from_findings(&findings);
        assert_eq!(techniques, vec!["boolean-based", "union-based"]);
    }

    #[test]
    fn test_no_findings_no_techniques() {
        assert!(techniques_from_findings(&[]).is_empty());
    }

    #[test]
    fn test_time_and_error_patterns() {
        let findings = vec![finding("time-based blind confirmed; error-based also works")];
        let techniques = techniques_from_findings(&findings);
        assert_eq!(techniques, vec!["time-based", "error-based"]);
    }
}
