//! libSQL storage for advising runs (offline, local file).
//!
//! The [`Storage`] struct persists each run's profile, completed stage
//! results, last stage failure, and Q&A history, so every CLI invocation can
//! pick a run up where the previous one stopped.
//!
//! **Access rules:**
//! - pipeline commands: read-write via [`Storage::open`]
//! - `status`, `show`, `list`, `report`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use smartadmit_shared::{
    Profile, ProfileField, QaExchange, Result, RunId, SmartAdmitError, StageFailure, StageResult,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// A run as loaded from the database, without its stage results.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRun {
    pub id: RunId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub profile: Profile,
    pub last_failure: Option<StageFailure>,
}

/// One line of `list` output.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub id: RunId,
    pub student_name: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub completed_stages: u32,
    pub failed_stage: Option<String>,
}

fn storage_err(e: impl std::fmt::Display) -> SmartAdmitError {
    SmartAdmitError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SmartAdmitError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SmartAdmitError::Storage(format!(
                "no run database at {}; start a run first",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SmartAdmitError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SmartAdmitError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    async fn touch(&self, run_id: &RunId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE runs SET updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), run_id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a new run with its initial profile.
    pub async fn insert_run(&self, run_id: &RunId, profile: &Profile) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, created_at, updated_at, profile_json, failure_json)
                 VALUES (?1, ?2, ?3, ?4, NULL)",
                params![run_id.to_string(), now.as_str(), now.as_str(), to_json(profile)?],
            )
            .await
            .map_err(storage_err)?;
        tracing::debug!(%run_id, "run inserted");
        Ok(())
    }

    /// Load a run by id.
    pub async fn load_run(&self, run_id: &RunId) -> Result<Option<StoredRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, created_at, updated_at, profile_json, failure_json
                 FROM runs WHERE id = ?1",
                params![run_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(StoredRun {
                id: *run_id,
                created_at: timestamp(&row, 1)?,
                updated_at: timestamp(&row, 2)?,
                profile: from_json(&row.get::<String>(3).map_err(storage_err)?)?,
                last_failure: match row.get::<String>(4).ok() {
                    Some(json) => Some(from_json(&json)?),
                    None => None,
                },
            })),
            None => Ok(None),
        }
    }

    /// Most recently updated run, if any.
    pub async fn latest_run_id(&self) -> Result<Option<RunId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM runs ORDER BY updated_at DESC, id DESC LIMIT 1",
                params![],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_run_id(&row, 0)?)),
            None => Ok(None),
        }
    }

    /// All runs, most recently updated first.
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT r.id, r.updated_at, r.profile_json, r.failure_json,
                        (SELECT COUNT(*) FROM stage_results s WHERE s.run_id = r.id)
                 FROM runs r
                 ORDER BY r.updated_at DESC, r.id DESC",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let profile: Profile = from_json(&row.get::<String>(2).map_err(storage_err)?)?;
            let failure: Option<StageFailure> = match row.get::<String>(3).ok() {
                Some(json) => Some(from_json(&json)?),
                None => None,
            };
            results.push(RunSummary {
                id: row_run_id(&row, 0)?,
                student_name: profile
                    .get(ProfileField::StudentName)
                    .map(ToString::to_string),
                updated_at: timestamp(&row, 1)?,
                completed_stages: row.get::<u32>(4).unwrap_or(0),
                failed_stage: failure.map(|f| f.stage),
            });
        }
        Ok(results)
    }

    /// Delete a run and everything recorded for it. Returns whether it existed.
    pub async fn delete_run(&self, run_id: &RunId) -> Result<bool> {
        self.check_writable()?;
        let id = run_id.to_string();
        for sql in [
            "DELETE FROM stage_results WHERE run_id = ?1",
            "DELETE FROM qa_history WHERE run_id = ?1",
        ] {
            self.conn
                .execute(sql, params![id.as_str()])
                .await
                .map_err(storage_err)?;
        }
        let deleted = self
            .conn
            .execute("DELETE FROM runs WHERE id = ?1", params![id.as_str()])
            .await
            .map_err(storage_err)?;
        Ok(deleted > 0)
    }

    /// Set or clear the run's last stage failure.
    pub async fn record_failure(
        &self,
        run_id: &RunId,
        failure: Option<&StageFailure>,
    ) -> Result<()> {
        self.check_writable()?;
        let json = failure.map(to_json).transpose()?;
        self.conn
            .execute(
                "UPDATE runs SET failure_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![json, Utc::now().to_rfc3339(), run_id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stage results
    // -----------------------------------------------------------------------

    /// Store a completed stage. A result already stored for the same stage
    /// is kept as is.
    pub async fn save_stage_result(
        &self,
        run_id: &RunId,
        position: u32,
        result: &StageResult,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO stage_results
                    (run_id, stage, position, raw_text, reconciled_json, model, sources_json, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(run_id, stage) DO NOTHING",
                params![
                    run_id.to_string(),
                    result.stage.as_str(),
                    position,
                    result.raw.as_str(),
                    to_json(&result.reconciled)?,
                    result.model.as_str(),
                    to_json(&result.sources)?,
                    result.completed_at.to_rfc3339()
                ],
            )
            .await
            .map_err(storage_err)?;
        self.touch(run_id).await
    }

    /// Stage results of a run in pipeline order.
    pub async fn load_stage_results(&self, run_id: &RunId) -> Result<Vec<StageResult>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage, raw_text, reconciled_json, model, sources_json, completed_at
                 FROM stage_results WHERE run_id = ?1 ORDER BY position",
                params![run_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(StageResult {
                stage: row.get::<String>(0).map_err(storage_err)?,
                raw: row.get::<String>(1).map_err(storage_err)?,
                reconciled: from_json(&row.get::<String>(2).map_err(storage_err)?)?,
                model: row.get::<String>(3).map_err(storage_err)?,
                sources: from_json(&row.get::<String>(4).map_err(storage_err)?)?,
                completed_at: timestamp(&row, 5)?,
            });
        }
        Ok(results)
    }

    /// Refinement reset in one transaction: store the amended profile, drop
    /// every stage result, and clear the last failure.
    pub async fn reset_for_refinement(&self, run_id: &RunId, profile: &Profile) -> Result<()> {
        self.check_writable()?;
        let id = run_id.to_string();
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        let updated = tx
            .execute(
                "UPDATE runs SET profile_json = ?1, failure_json = NULL, updated_at = ?2
                 WHERE id = ?3",
                params![to_json(profile)?, now.as_str(), id.as_str()],
            )
            .await
            .map_err(storage_err)?;
        if updated == 0 {
            tx.rollback().await.map_err(storage_err)?;
            return Err(SmartAdmitError::Storage(format!("run {run_id} not found")));
        }
        tx.execute(
            "DELETE FROM stage_results WHERE run_id = ?1",
            params![id.as_str()],
        )
        .await
        .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;

        tracing::debug!(%run_id, "run reset for refinement");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Q&A history
    // -----------------------------------------------------------------------

    pub async fn append_qa(&self, run_id: &RunId, exchange: &QaExchange) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO qa_history (run_id, question, answer, asked_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    run_id.to_string(),
                    exchange.question.as_str(),
                    exchange.answer.as_str(),
                    exchange.asked_at.to_rfc3339()
                ],
            )
            .await
            .map_err(storage_err)?;
        self.touch(run_id).await
    }

    pub async fn list_qa(&self, run_id: &RunId) -> Result<Vec<QaExchange>> {
        let mut rows = self
            .conn
            .query(
                "SELECT question, answer, asked_at FROM qa_history
                 WHERE run_id = ?1 ORDER BY id",
                params![run_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(QaExchange {
                question: row.get::<String>(0).map_err(storage_err)?,
                answer: row.get::<String>(1).map_err(storage_err)?,
                asked_at: timestamp(&row, 2)?,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| SmartAdmitError::parse(e.to_string()))
}

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| SmartAdmitError::parse(format!("stored JSON: {e}")))
}

fn timestamp(row: &Row, idx: i32) -> Result<DateTime<Utc>> {
    let text = row.get::<String>(idx).map_err(storage_err)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SmartAdmitError::parse(format!("bad timestamp '{text}': {e}")))
}

fn row_run_id(row: &Row, idx: i32) -> Result<RunId> {
    let text = row.get::<String>(idx).map_err(storage_err)?;
    text.parse()
        .map_err(|e| SmartAdmitError::parse(format!("bad run id '{text}': {e}")))
}
