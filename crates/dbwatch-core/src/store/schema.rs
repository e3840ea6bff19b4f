//! Core store schema.

pub const SCHEMA: &str = r#"
-- System configuration (server identity, schema bookkeeping)
CREATE TABLE IF NOT EXISTS system_config (
    config_key TEXT PRIMARY KEY,
    config_value TEXT NOT NULL,
    last_modified TEXT NOT NULL
);

-- Managed database registry; rows are soft-deleted via status
CREATE TABLE IF NOT EXISTS managed_databases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    size INTEGER,
    last_modified TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'inactive', 'error', 'removed')),
    created_at TEXT NOT NULL,
    last_checked TEXT
);

CREATE INDEX IF NOT EXISTS idx_managed_databases_path
    ON managed_databases(path);

CREATE INDEX IF NOT EXISTS idx_managed_databases_status
    ON managed_databases(status);
"#;
