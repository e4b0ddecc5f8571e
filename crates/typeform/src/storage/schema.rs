//! `SQLite` schema definitions for the response cache.

/// SQL statement to create the responses table.
///
/// `payload` is the response re-serialized as JSON; `payload_hash` is its
/// BLAKE3 hash, used to detect responses that changed since the last sync.
pub const CREATE_RESPONSES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    form_id TEXT NOT NULL,
    token TEXT NOT NULL,
    response_id TEXT,
    landed_at TEXT NOT NULL,
    submitted_at TEXT,
    payload TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    UNIQUE (form_id, token)
)
";

/// Index for newest-first listing within a form.
pub const CREATE_SUBMITTED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_responses_submitted ON responses(form_id, submitted_at DESC)
";

/// Index on `form_id` for counting and pruning.
pub const CREATE_FORM_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_responses_form ON responses(form_id)
";

/// Index on `payload_hash` for change detection.
pub const CREATE_HASH_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_responses_hash ON responses(payload_hash)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_RESPONSES_TABLE,
    CREATE_SUBMITTED_INDEX,
    CREATE_FORM_INDEX,
    CREATE_HASH_INDEX,
    CREATE_METADATA_TABLE,
];
