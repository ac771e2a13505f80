pub mod notifications;
pub mod results;
pub mod schema;
pub mod scans;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::errors::ScanError;
use crate::models::{Severity, VulnKind};

/// Handle to the scan store. rusqlite connections are not `Sync`, and the
/// write rate of a scan (a burst at completion, occasional estado updates)
/// is low enough that one mutex-guarded connection serves every caller.
#[derive(Clone)]
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, ScanError> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ScanError::Database(format!("no se pudo abrir {}: {}", path, e)))?;
        Self::initialize(conn)
    }

    pub fn in_memory() -> Result<Self, ScanError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ScanError::Database(format!("no se pudo abrir la base en memoria: {}", e)))?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, ScanError> {
        // Scan tasks and the API surface share this handle; WAL lets status
        // reads proceed during the adapter's completion burst, and the busy
        // timeout covers the rest.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )
        .map_err(|e| ScanError::Database(format!("fallo configurando pragmas: {}", e)))?;
        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| ScanError::Database(format!("fallo creando tablas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.seed_catalogs()?;
        Ok(db)
    }

    /// Pre-populates the type and severity catalogs the persistence adapter
    /// resolves against. `resolve_*` still creates rows on demand, so a
    /// pre-existing database with extra entries is left alone.
    fn seed_catalogs(&self) -> Result<(), ScanError> {
        for kind in [VulnKind::Sqli, VulnKind::Xss] {
            self.resolve_vulnerability_type(kind.as_str())?;
        }
        for severity in [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
        ] {
            self.resolve_severity_level(severity.nombre())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogs_seeded_on_open() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let types: i64 = conn
            .query_row("SELECT COUNT(*) FROM vulnerability_types", [], |row| row.get(0))
            .unwrap();
        let levels: i64 = conn
            .query_row("SELECT COUNT(*) FROM severity_levels", [], |row| row.get(0))
            .unwrap();
        assert_eq!(types, 2);
        assert_eq!(levels, 4);
        let nombre: String = conn
            .query_row(
                "SELECT nombre FROM severity_levels WHERE nombre = 'Crítica'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nombre, "Crítica");
    }

    #[test]
    fn test_reopen_does_not_duplicate_catalogs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.db").display().to_string();
        {
            let _db = Database::new(&path).unwrap();
        }
        let db = Database::new(&path).unwrap();
        let conn = db.conn.lock().unwrap();
        let types: i64 = conn
            .query_row("SELECT COUNT(*) FROM vulnerability_types", [], |row| row.get(0))
            .unwrap();
        assert_eq!(types, 2);
    }
}
