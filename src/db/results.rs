use chrono::Utc;
use crate::errors::ScanError;
use super::Database;

impl Database {
    /// Resolves a vulnerability type row by name, creating it if missing.
    pub fn resolve_vulnerability_type(&self, nombre: &str) -> Result<i64, ScanError> {
        self.resolve_catalog_row("vulnerability_types", nombre)
    }

    /// Resolves a severity level row by its Spanish name, creating it if
    /// missing.
    pub fn resolve_severity_level(&self, nombre: &str) -> Result<i64, ScanError> {
        self.resolve_catalog_row("severity_levels", nombre)
    }

    fn resolve_catalog_row(&self, table: &str, nombre: &str) -> Result<i64, ScanError> {
        let conn = self.conn.lock().unwrap();
        let existing = conn.query_row(
            &format!("SELECT id FROM {} WHERE nombre = ?1", table),
            rusqlite::params![nombre],
            |row| row.get::<_, i64>(0),
        );
        match existing {
            Ok(id) => Ok(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                conn.execute(
                    &format!("INSERT INTO {} (nombre) VALUES (?1)", table),
                    rusqlite::params![nombre],
                )
                .map_err(|e| ScanError::Database(format!("Insert into {} failed: {}", table, e)))?;
                Ok(conn.last_insert_rowid())
            }
            Err(e) => Err(ScanError::Database(format!("Query error: {}", e))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_vulnerability(
        &self,
        escaneo_id: &str,
        tipo_id: i64,
        nivel_severidad_id: i64,
        parametro_afectado: &str,
        url_afectada: &str,
        descripcion: &str,
        sugerencia: &str,
        referencia: &str,
    ) -> Result<i64, ScanError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO vulnerabilities (escaneo_id, tipo_id, nivel_severidad_id, parametro_afectado, url_afectada, descripcion, sugerencia, referencia, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                escaneo_id,
                tipo_id,
                nivel_severidad_id,
                parametro_afectado,
                url_afectada,
                descripcion,
                sugerencia,
                referencia,
                Utc::now().to_rfc3339(),
            ],
        ).map_err(|e| ScanError::Database(format!("Vulnerability insert failed: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_quiz_answer(
        &self,
        escaneo_id: &str,
        pregunta_id: &str,
        respuesta_seleccionada_id: &str,
        es_correcta: bool,
        puntos_obtenidos: u32,
    ) -> Result<i64, ScanError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO quiz_answers (escaneo_id, pregunta_id, respuesta_seleccionada_id, es_correcta, puntos_obtenidos, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                escaneo_id,
                pregunta_id,
                respuesta_seleccionada_id,
                es_correcta as i64,
                puntos_obtenidos,
                Utc::now().to_rfc3339(),
            ],
        ).map_err(|e| ScanError::Database(format!("Answer insert failed: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn vulnerabilities_for_scan(&self, escaneo_id: &str) -> Result<Vec<serde_json::Value>, ScanError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT v.id, t.nombre, s.nombre, v.parametro_afectado, v.url_afectada, v.descripcion, v.sugerencia, v.referencia
             FROM vulnerabilities v
             JOIN vulnerability_types t ON t.id = v.tipo_id
             JOIN severity_levels s ON s.id = v.nivel_severidad_id
             WHERE v.escaneo_id = ?1 ORDER BY v.id"
        ).map_err(|e| ScanError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt
            .query_map(rusqlite::params![escaneo_id], |row: &rusqlite::Row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, i64>(0)?,
                    "tipo": row.get::<_, String>(1)?,
                    "severidad": row.get::<_, String>(2)?,
                    "parametro_afectado": row.get::<_, String>(3)?,
                    "url_afectada": row.get::<_, String>(4)?,
                    "descripcion": row.get::<_, Option<String>>(5)?,
                    "sugerencia": row.get::<_, Option<String>>(6)?,
                    "referencia": row.get::<_, Option<String>>(7)?,
                }))
            })
            .map_err(|e| ScanError::Database(format!("Query error: {}", e)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| ScanError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_rows_created_once() {
        let db = Database::in_memory().unwrap();
        let first = db.resolve_vulnerability_type("SQLi").unwrap();
        let second = db.resolve_vulnerability_type("SQLi").unwrap();
        assert_eq!(first, second);
        let other = db.resolve_vulnerability_type("XSS").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_vulnerability_round_trip() {
        let db = Database::in_memory().unwrap();
        db.create_scan("s1", "u1", None, "http://site.test/", true, true)
            .unwrap();
        let tipo = db.resolve_vulnerability_type("SQLi").unwrap();
        let severidad = db.resolve_severity_level("Crítica").unwrap();
        db.insert_vulnerability(
            "s1",
            tipo,
            severidad,
            "id",
            "http://site.test/a?id=1",
            "boolean-based blind",
            "Utilice consultas parametrizadas",
            "https://owasp.org/Top10/",
        )
        .unwrap();

        let stored = db.vulnerabilities_for_scan("s1").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["tipo"], "SQLi");
        assert_eq!(stored[0]["severidad"], "Crítica");
    }
}
