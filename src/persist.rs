use crate::db::Database;
use crate::errors::ScanError;
use crate::models::VulnKind;
use crate::orchestrator::state::ScanEstado;
use crate::orchestrator::ScanReport;

/// Canned remediation text, keyed on the vulnerability family.
fn remediation_for(kind: VulnKind) -> &'static str {
    match kind {
        VulnKind::Sqli => {
            "Utilice consultas parametrizadas o un ORM, valide la entrada del usuario y aplique el principio de mínimo privilegio en la cuenta de base de datos."
        }
        VulnKind::Xss => {
            "Sanee y codifique toda salida según su contexto (HTML, atributo, JavaScript) y despliegue una Content-Security-Policy restrictiva."
        }
    }
}

fn reference_for(kind: VulnKind) -> &'static str {
    match kind {
        VulnKind::Sqli => "https://owasp.org/www-community/attacks/SQL_Injection",
        VulnKind::Xss => "https://owasp.org/www-community/attacks/xss/",
    }
}

/// Translates a finished scan's in-memory findings into persisted
/// vulnerability, quiz-answer and notification records, and drives the scan
/// row's estado transitions.
pub struct ResultPersistenceAdapter {
    db: Database,
}

impl ResultPersistenceAdapter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn scan_started(&self, scan_id: &str) -> Result<(), ScanError> {
        self.db.update_scan_estado(scan_id, ScanEstado::EnProgreso)
    }

    pub fn scan_errored(&self, scan_id: &str) -> Result<(), ScanError> {
        self.db.update_scan_estado(scan_id, ScanEstado::Error)
    }

    pub fn scan_stopped(&self, scan_id: &str) -> Result<(), ScanError> {
        self.db.update_scan_estado(scan_id, ScanEstado::Detenido)
    }

    /// Persists everything a completed scan produced. Points are stored
    /// exactly as the gate computed them; the final score is the
    /// orchestrator's 60/40 formula.
    pub fn scan_completed(&self, report: &ScanReport) -> Result<(), ScanError> {
        for vulnerability in &report.vulnerabilities {
            let tipo_id = self
                .db
                .resolve_vulnerability_type(vulnerability.kind.as_str())?;
            let severidad_id = self
                .db
                .resolve_severity_level(vulnerability.severity.nombre())?;
            self.db.insert_vulnerability(
                &report.scan_id,
                tipo_id,
                severidad_id,
                &vulnerability.parameter,
                &vulnerability.endpoint,
                &vulnerability.description,
                remediation_for(vulnerability.kind),
                reference_for(vulnerability.kind),
            )?;
        }

        for result in &report.question_results {
            let selected_id = result
                .prompt
                .answer_ids
                .get(result.user_answer)
                .map(String::as_str)
                .unwrap_or("");
            self.db.insert_quiz_answer(
                &report.scan_id,
                &result.prompt.question_id,
                selected_id,
                result.correct,
                result.points_earned,
            )?;
        }

        self.db.update_scan_score(&report.scan_id, &report.score)?;
        self.db
            .update_scan_estado(&report.scan_id, ScanEstado::Finalizado)?;

        let owner = self
            .db
            .scan_owner(&report.scan_id)?
            .unwrap_or_else(|| "sistema".to_string());
        let mensaje = format!(
            "El escaneo de {} finalizó con una puntuación de {} ({})",
            report.target_url,
            report.score.final_score,
            report.score.grade
        );
        self.db.insert_notification(
            &owner,
            "scan_completed",
            "Escaneo completado",
            &mensaje,
            Some(&report.scan_id),
        )?;
        self.db
            .insert_activity(&owner, "scan_completed", Some(&report.target_url))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        QuestionPrompt, QuestionResult, Severity, Vulnerability,
    };
    use crate::orchestrator::state::ScanStats;
    use crate::scoring::compute_score;

    fn report() -> ScanReport {
        let question_results = vec![QuestionResult {
            prompt: QuestionPrompt {
                question_id: "q1".to_string(),
                phase_tag: "discovery".to_string(),
                text: "¿?".to_string(),
                options: vec!["a".into(), "b".into()],
                answer_ids: vec!["ans-a".into(), "ans-b".into()],
                correct_index: 1,
                points: 10,
            },
            user_answer: 1,
            correct: true,
            points_earned: 10,
        }];
        let vulnerabilities = vec![
            Vulnerability {
                kind: VulnKind::Sqli,
                severity: Severity::Critical,
                endpoint: "http://site.test/a?id=1".to_string(),
                parameter: "id".to_string(),
                description: "boolean-based blind".to_string(),
            },
            Vulnerability {
                kind: VulnKind::Xss,
                severity: Severity::High,
                endpoint: "http://site.test/s".to_string(),
                parameter: "q".to_string(),
                description: "reflected".to_string(),
            },
        ];
        let score = compute_score(&question_results, vulnerabilities.len());
        ScanReport {
            scan_id: "s1".to_string(),
            target_url: "http://site.test/".to_string(),
            score,
            vulnerabilities,
            question_results,
            stats: ScanStats::default(),
        }
    }

    #[test]
    fn test_scan_completed_persists_everything() {
        let db = Database::in_memory().unwrap();
        db.create_scan("s1", "u1", None, "http://site.test/", true, true)
            .unwrap();
        let adapter = ResultPersistenceAdapter::new(db.clone());
        adapter.scan_started("s1").unwrap();
        adapter.scan_completed(&report()).unwrap();

        let scan = db.get_scan("s1").unwrap().unwrap();
        assert_eq!(scan["estado"], "finalizado");
        assert_eq!(scan["puntuacion"]["puntos_cuestionario"], 10);
        assert_eq!(scan["puntuacion"]["vulnerabilidades_encontradas"], 2);
        assert!(!scan["fecha_fin"].is_null());

        let vulns = db.vulnerabilities_for_scan("s1").unwrap();
        assert_eq!(vulns.len(), 2);
        assert_eq!(vulns[0]["severidad"], "Crítica");
        assert_eq!(vulns[1]["tipo"], "XSS");
        assert_eq!(vulns[1]["severidad"], "Alta");
        assert!(vulns[0]["sugerencia"]
            .as_str()
            .unwrap()
            .contains("parametrizadas"));

        let notifications = db.notifications_for_user("u1").unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0]["tipo"], "scan_completed");
        assert_eq!(notifications[0]["relacionado_id"], "s1");
    }

    #[test]
    fn test_estado_on_error_and_stop() {
        let db = Database::in_memory().unwrap();
        db.create_scan("s1", "u1", None, "http://site.test/", true, true)
            .unwrap();
        let adapter = ResultPersistenceAdapter::new(db.clone());

        adapter.scan_errored("s1").unwrap();
        assert_eq!(db.get_scan("s1").unwrap().unwrap()["estado"], "error");

        adapter.scan_stopped("s1").unwrap();
        assert_eq!(db.get_scan("s1").unwrap().unwrap()["estado"], "detenido");
    }

    #[test]
    fn test_points_persisted_as_gate_computed() {
        let db = Database::in_memory().unwrap();
        db.create_scan("s1", "u1", None, "http://site.test/", true, true)
            .unwrap();
        let adapter = ResultPersistenceAdapter::new(db.clone());
        let mut r = report();
        r.question_results[0].points_earned = 7;
        adapter.scan_completed(&r).unwrap();

        let conn = db.conn.lock().unwrap();
        let points: i64 = conn
            .query_row(
                "SELECT puntos_obtenidos FROM quiz_answers WHERE escaneo_id = 's1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(points, 7);
    }
}
