//! SQL migration definitions for the SmartAdmit run database.
//!
//! Migrations are applied in order on database open. Each one records its
//! version in `schema_migrations`.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: runs, stage_results, qa_history",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per advising run; the profile travels with it
CREATE TABLE IF NOT EXISTS runs (
    id           TEXT PRIMARY KEY,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    profile_json TEXT NOT NULL,
    failure_json TEXT
);

-- Completed stages; immutable once written
CREATE TABLE IF NOT EXISTS stage_results (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    stage           TEXT NOT NULL,
    position        INTEGER NOT NULL,
    raw_text        TEXT NOT NULL,
    reconciled_json TEXT NOT NULL,
    model           TEXT NOT NULL,
    sources_json    TEXT NOT NULL DEFAULT '[]',
    completed_at    TEXT NOT NULL,
    UNIQUE(run_id, stage)
);

CREATE INDEX IF NOT EXISTS idx_stage_results_run ON stage_results(run_id);

-- Follow-up questions, in the order asked
CREATE TABLE IF NOT EXISTS qa_history (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id   TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    question TEXT NOT NULL,
    answer   TEXT NOT NULL,
    asked_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_qa_history_run ON qa_history(run_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
