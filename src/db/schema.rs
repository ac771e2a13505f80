pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS scans (
    id TEXT PRIMARY KEY,
    usuario_id TEXT NOT NULL,
    alias TEXT,
    url TEXT NOT NULL,
    sqli INTEGER NOT NULL DEFAULT 0,
    xss INTEGER NOT NULL DEFAULT 0,
    gestor TEXT,
    estado TEXT NOT NULL DEFAULT 'pendiente',
    puntos_cuestionario INTEGER DEFAULT 0,
    total_puntos_cuestionario INTEGER DEFAULT 0,
    vulnerabilidades_encontradas INTEGER DEFAULT 0,
    puntuacion_final INTEGER,
    calificacion TEXT,
    created_at TEXT NOT NULL,
    fecha_inicio TEXT,
    fecha_fin TEXT
);

CREATE TABLE IF NOT EXISTS vulnerability_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS severity_levels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS vulnerabilities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    escaneo_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    tipo_id INTEGER NOT NULL REFERENCES vulnerability_types(id),
    nivel_severidad_id INTEGER NOT NULL REFERENCES severity_levels(id),
    parametro_afectado TEXT NOT NULL,
    url_afectada TEXT NOT NULL,
    descripcion TEXT,
    sugerencia TEXT,
    referencia TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quiz_answers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    escaneo_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    pregunta_id TEXT NOT NULL,
    respuesta_seleccionada_id TEXT NOT NULL,
    es_correcta INTEGER NOT NULL,
    puntos_obtenidos INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    usuario_id TEXT NOT NULL,
    tipo TEXT NOT NULL,
    titulo TEXT NOT NULL,
    mensaje TEXT NOT NULL,
    relacionado_id TEXT,
    leida INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    usuario_id TEXT NOT NULL,
    accion TEXT NOT NULL,
    detalle TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vulnerabilities_scan ON vulnerabilities(escaneo_id);
CREATE INDEX IF NOT EXISTS idx_quiz_answers_scan ON quiz_answers(escaneo_id);
CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(usuario_id);
CREATE INDEX IF NOT EXISTS idx_scans_estado ON scans(estado);
";
