//! `SQLite` schema for the local tracker store.

/// One row per session.
pub const CREATE_TRACKERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS trackers (
    session_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    client TEXT NOT NULL
)
";

/// Samples in arrival order; `id` preserves that order.
pub const CREATE_SAMPLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES trackers(session_id),
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    accuracy REAL NOT NULL,
    timestamp TEXT NOT NULL,
    ip TEXT NOT NULL,
    device_info TEXT NOT NULL,
    received_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)
";

/// Per-session history lookups.
pub const CREATE_SAMPLES_SESSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_samples_session ON samples(session_id, id)
";

/// Key-value pairs such as the schema version.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// Base schema, applied in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_TRACKERS_TABLE,
    CREATE_SAMPLES_TABLE,
    CREATE_SAMPLES_SESSION_INDEX,
    CREATE_METADATA_TABLE,
];
