use chrono::Utc;
use crate::errors::ScanError;
use super::Database;

impl Database {
    pub fn insert_notification(
        &self,
        usuario_id: &str,
        tipo: &str,
        titulo: &str,
        mensaje: &str,
        relacionado_id: Option<&str>,
    ) -> Result<i64, ScanError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notifications (usuario_id, tipo, titulo, mensaje, relacionado_id, leida, created_at) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            rusqlite::params![usuario_id, tipo, titulo, mensaje, relacionado_id, Utc::now().to_rfc3339()],
        ).map_err(|e| ScanError::Database(format!("Notification insert failed: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_activity(
        &self,
        usuario_id: &str,
        accion: &str,
        detalle: Option<&str>,
    ) -> Result<i64, ScanError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO activity_log (usuario_id, accion, detalle, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![usuario_id, accion, detalle, Utc::now().to_rfc3339()],
        ).map_err(|e| ScanError::Database(format!("Activity insert failed: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn notifications_for_user(&self, usuario_id: &str) -> Result<Vec<serde_json::Value>, ScanError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tipo, titulo, mensaje, relacionado_id, leida, created_at FROM notifications WHERE usuario_id = ?1 ORDER BY id DESC"
        ).map_err(|e| ScanError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt
            .query_map(rusqlite::params![usuario_id], |row: &rusqlite::Row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, i64>(0)?,
                    "tipo": row.get::<_, String>(1)?,
                    "titulo": row.get::<_, String>(2)?,
                    "mensaje": row.get::<_, String>(3)?,
                    "relacionado_id": row.get::<_, Option<String>>(4)?,
                    "leida": row.get::<_, i64>(5)? != 0,
                    "created_at": row.get::<_, String>(6)?,
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
