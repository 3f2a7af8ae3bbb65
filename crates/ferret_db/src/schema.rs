//! Schema of a freshly initialized index database.
//!
//! All statements run inside one transaction when the database file is
//! created; a failure leaves no file behind.

/// Table, index and trigger definitions, in execution order.
pub const INIT_QUERIES: &[&str] = &[
    r#"
CREATE TABLE root (
    id INTEGER PRIMARY KEY,
    path TEXT UNIQUE NOT NULL,
    last_scan INTEGER NOT NULL DEFAULT 0
) STRICT
"#,
    "CREATE INDEX root_scan_idx ON root (last_scan)",
    r#"
CREATE TABLE file (
    id INTEGER PRIMARY KEY,
    root_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    ctime INTEGER NOT NULL DEFAULT 0,
    last_refresh INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (root_id) REFERENCES root (id)
        ON UPDATE RESTRICT
        ON DELETE CASCADE,
    UNIQUE (root_id, path)
) STRICT
"#,
    "CREATE INDEX file_time_idx ON file (ctime)",
    "CREATE INDEX file_path_idx ON file (path)",
    "CREATE INDEX file_mime_idx ON file (mime_type)",
    r#"
CREATE TABLE blacklist (
    id INTEGER PRIMARY KEY,
    pattern TEXT UNIQUE NOT NULL,
    is_glob INTEGER NOT NULL,
    hit_cnt INTEGER NOT NULL DEFAULT 0,
    CHECK (hit_cnt >= 0)
) STRICT
"#,
    "CREATE INDEX bl_cnt_idx ON blacklist (hit_cnt)",
    r#"
CREATE TABLE meta (
    id INTEGER PRIMARY KEY,
    file_id INTEGER UNIQUE NOT NULL,
    timestamp INTEGER NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    meta TEXT NOT NULL DEFAULT '{}',
    FOREIGN KEY (file_id) REFERENCES file (id)
        ON UPDATE RESTRICT
        ON DELETE CASCADE
) STRICT
"#,
    "CREATE INDEX meta_time_idx ON meta (timestamp)",
    // rowid of a full-text row is the id of its meta row
    r#"
CREATE VIRTUAL TABLE meta_fts USING fts5 (
    file_id UNINDEXED,
    content,
    tokenize = 'unicode61 remove_diacritics 2'
)
"#,
    r#"
CREATE TRIGGER meta_fts_ai AFTER INSERT ON meta
BEGIN
    INSERT INTO meta_fts (rowid, file_id, content)
    VALUES (new.id, new.file_id, new.content);
END
"#,
    r#"
CREATE TRIGGER meta_fts_ad AFTER DELETE ON meta
BEGIN
    DELETE FROM meta_fts WHERE rowid = old.id;
END
"#,
    r#"
CREATE TRIGGER meta_fts_au AFTER UPDATE OF content ON meta
BEGIN
    DELETE FROM meta_fts WHERE rowid = old.id;
    INSERT INTO meta_fts (rowid, file_id, content)
    VALUES (new.id, new.file_id, new.content);
END
"#,
];

/// Blacklist rules every new database starts with: `(pattern, is_glob)`.
///
/// Patterns are matched against base names.
pub const SEED_RULES: &[(&str, bool)] = &[
    (".*", true),
    ("#$", false),
    ("~$", false),
    ("*.swp", true),
    ("*.o", true),
    ("*.pyc", true),
    ("*.class", true),
    ("__pycache__", true),
    ("node_modules", true),
    ("lost+found", true),
];

/// Statements run by `Store::perform_maintenance`.
pub const MAINTENANCE_QUERIES: &[&str] = &[
    "PRAGMA wal_checkpoint(TRUNCATE)",
    "VACUUM",
    "REINDEX",
    "ANALYZE",
];
