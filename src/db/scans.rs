use chrono::Utc;
use crate::errors::ScanError;
use crate::orchestrator::state::ScanEstado;
use super::Database;

impl Database {
    pub fn create_scan(
        &self,
        id: &str,
        usuario_id: &str,
        alias: Option<&str>,
        url: &str,
        sqli: bool,
        xss: bool,
    ) -> Result<(), ScanError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scans (id, usuario_id, alias, url, sqli, xss, estado, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pendiente', ?7)",
            rusqlite::params![id, usuario_id, alias, url, sqli as i64, xss as i64, Utc::now().to_rfc3339()],
        ).map_err(|e| ScanError::Database(format!("Failed to create scan: {}", e)))?;
        Ok(())
    }

    /// Moves the scan to a new estado, stamping fecha_inicio on en_progreso
    /// and fecha_fin on any terminal estado.
    pub fn update_scan_estado(&self, id: &str, estado: ScanEstado) -> Result<(), ScanError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        match estado {
            ScanEstado::EnProgreso => {
                conn.execute(
                    "UPDATE scans SET estado = ?2, fecha_inicio = ?3 WHERE id = ?1",
                    rusqlite::params![id, estado.as_str(), now],
                )
            }
            ScanEstado::Finalizado | ScanEstado::Error | ScanEstado::Detenido => {
                conn.execute(
                    "UPDATE scans SET estado = ?2, fecha_fin = ?3 WHERE id = ?1",
                    rusqlite::params![id, estado.as_str(), now],
                )
            }
            ScanEstado::Pendiente => {
                conn.execute(
                    "UPDATE scans SET estado = ?2 WHERE id = ?1",
                    rusqlite::params![id, estado.as_str()],
                )
            }
        }
        .map_err(|e| ScanError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }

    pub fn update_scan_score(
        &self,
        id: &str,
        score: &crate::scoring::FinalScore,
    ) -> Result<(), ScanError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scans SET puntos_cuestionario = ?2, total_puntos_cuestionario = ?3, vulnerabilidades_encontradas = ?4, puntuacion_final = ?5, calificacion = ?6 WHERE id = ?1",
            rusqlite::params![
                id,
                score.quiz_points,
                score.total_quiz_points,
                score.vulnerabilities_found as i64,
                score.final_score,
                score.grade.as_str(),
            ],
        ).map_err(|e| ScanError::Database(format!("Score update failed: {}", e)))?;
        Ok(())
    }

    pub fn set_scan_gestor(&self, id: &str, gestor: &str) -> Result<(), ScanError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scans SET gestor = ?2 WHERE id = ?1",
            rusqlite::params![id, gestor],
        )
        .map_err(|e| ScanError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }

    pub fn get_scan(&self, id: &str) -> Result<Option<serde_json::Value>, ScanError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, usuario_id, alias, url, sqli, xss, gestor, estado, puntos_cuestionario, total_puntos_cuestionario, vulnerabilidades_encontradas, puntuacion_final, calificacion, created_at, fecha_inicio, fecha_fin FROM scans WHERE id = ?1"
        ).map_err(|e| ScanError::Database(format!("Query failed: {}", e)))?;

        let result = stmt.query_row(rusqlite::params![id], |row: &rusqlite::Row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "usuario_id": row.get::<_, String>(1)?,
                "alias": row.get::<_, Option<String>>(2)?,
                "url": row.get::<_, String>(3)?,
                "flags": {
                    "sqli": row.get::<_, i64>(4)? != 0,
                    "xss": row.get::<_, i64>(5)? != 0,
                },
                "gestor": row.get::<_, Option<String>>(6)?,
                "estado": row.get::<_, String>(7)?,
                "puntuacion": {
                    "puntos_cuestionario": row.get::<_, i64>(8)?,
                    "total_puntos_cuestionario": row.get::<_, i64>(9)?,
                    "vulnerabilidades_encontradas": row.get::<_, i64>(10)?,
                    "puntuacion_final": row.get::<_, Option<i64>>(11)?,
                    "calificacion": row.get::<_, Option<String>>(12)?,
                },
                "created_at": row.get::<_, String>(13)?,
                "fecha_inicio": row.get::<_, Option<String>>(14)?,
                "fecha_fin": row.get::<_, Option<String>>(15)?,
            }))
        });

        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ScanError::Database(format!("Query error: {}", e))),
        }
    }

    pub fn scan_owner(&self, id: &str) -> Result<Option<String>, ScanError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT usuario_id FROM scans WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(owner) => Ok(Some(owner)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ScanError::Database(format!("Query error: {}", e))),
        }
    }

    pub fn list_scans(&self, limit: usize, offset: usize) -> Result<Vec<serde_json::Value>, ScanError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, url, estado, puntuacion_final, created_at, fecha_fin FROM scans ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
        ).map_err(|e| ScanError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(rusqlite::params![limit as i64, offset as i64], |row: &rusqlite::Row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "url": row.get::<_, String>(1)?,
                "estado": row.get::<_, String>(2)?,
                "puntuacion_final": row.get::<_, Option<i64>>(3)?,
                "created_at": row.get::<_, String>(4)?,
                "fecha_fin": row.get::<_, Option<String>>(5)?,
            }))
        }).map_err(|e| ScanError::Database(format!("Query error: {}", e)))?;

        let mut results: Vec<serde_json::Value> = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| ScanError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }
}
