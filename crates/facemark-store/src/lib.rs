//! facemark-store: SQLite persistence for enrolled persons and detection logs.
//!
//! Embeddings are stored as JSON arrays next to the tag of the extractor
//! configuration that produced them. Row order is insertion order and is
//! the order the matcher sees.

use chrono::{Duration, SecondsFormat, Utc};
use facemark_core::gallery::{audit_gallery, AuditProblem, AuditReport};
use facemark_core::{Embedding, GalleryEntry};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persons (
    id                TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    description       TEXT,
    image_ref         TEXT NOT NULL,
    embedding         TEXT,
    extractor_version TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS detection_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id   TEXT,
    person_name TEXT,
    confidence  INTEGER,
    face_count  INTEGER NOT NULL,
    created_at  TEXT NOT NULL
);
";

const LOG_COLUMNS: &str = "id, person_id, person_name, confidence, face_count, created_at";

const PERSON_COLUMNS: &str =
    "id, name, description, image_ref, embedding, extractor_version, created_at, updated_at";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("embedding encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot create data directory {path}: {source}")]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// An enrolled person as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Reference to the enrollment photo (path or URL).
    pub image_ref: String,
    /// `None` until an embedding is extracted, or when the stored one is unreadable.
    pub embedding: Option<Embedding>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields supplied at enrollment time.
#[derive(Debug, Clone)]
pub struct NewPerson {
    pub name: String,
    pub description: Option<String>,
    pub image_ref: String,
    pub embedding: Option<Embedding>,
}

/// Editable person fields; `None` leaves the stored value unchanged.
///
/// The embedding is not editable here, see [`FaceStore::re_enroll`].
#[derive(Debug, Clone, Default)]
pub struct PersonUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Totals shown by `facemark stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overview {
    pub persons: u64,
    pub detection_logs: u64,
    /// Logs written since 00:00 UTC today.
    pub today_logs: u64,
}

/// Number of detection logs written on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyCount {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub count: u64,
}

/// A stored row whose embedding could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub id: String,
    pub name: String,
    pub reason: String,
}

/// Point-in-time gallery read for matching.
#[derive(Debug, Clone, Default)]
pub struct GallerySnapshot {
    pub entries: Vec<GalleryEntry>,
    pub rejected: Vec<RejectedRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionLog {
    pub id: i64,
    pub person_id: Option<String>,
    pub person_name: Option<String>,
    /// 0–100.
    pub confidence: Option<u32>,
    pub face_count: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewDetectionLog {
    pub person_id: Option<String>,
    pub person_name: Option<String>,
    pub confidence: Option<u32>,
    pub face_count: u32,
}

/// Default database location: `$FACEMARK_DB_PATH`, else
/// `$XDG_DATA_HOME/facemark/faces.db`, else `~/.local/share/facemark/faces.db`.
pub fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("FACEMARK_DB_PATH") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facemark")
        .join("faces.db")
}

struct PersonRow {
    id: String,
    name: String,
    description: Option<String>,
    image_ref: String,
    embedding: Option<String>,
    extractor_version: Option<String>,
    created_at: String,
    updated_at: String,
}

impl PersonRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            image_ref: row.get(3)?,
            embedding: row.get(4)?,
            extractor_version: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_person(self) -> Person {
        let embedding = self.embedding.as_deref().and_then(|json| {
            decode_embedding(json, self.extractor_version.clone())
                .map_err(|e| tracing::warn!(id = %self.id, error = %e, "unreadable stored embedding"))
                .ok()
        });
        Person {
            id: self.id,
            name: self.name,
            description: self.description,
            image_ref: self.image_ref,
            embedding,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn decode_embedding(json: &str, extractor_version: Option<String>) -> Result<Embedding, serde_json::Error> {
    let values: Vec<f32> = serde_json::from_str(json)?;
    Ok(Embedding {
        values,
        extractor_version,
    })
}

/// Fixed-width UTC timestamps, so text order is time order.
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `YYYY-MM-DD` of the UTC day `days_ago` days before today.
fn utc_day(days_ago: i64) -> String {
    (Utc::now() - Duration::days(days_ago)).format("%Y-%m-%d").to_string()
}

/// Handle to the facemark database.
pub struct FaceStore {
    conn: Connection,
}

impl FaceStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::DataDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened face store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Enroll a new person under a fresh UUID.
    pub fn enroll(&self, new: NewPerson) -> Result<Person, StoreError> {
        let id = Uuid::new_v4().to_string();
        let ts = now();
        let (embedding_json, version) = match &new.embedding {
            Some(e) => (Some(serde_json::to_string(&e.values)?), e.extractor_version.clone()),
            None => (None, None),
        };

        self.conn.execute(
            "INSERT INTO persons (id, name, description, image_ref, embedding, extractor_version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![id, new.name, new.description, new.image_ref, embedding_json, version, ts],
        )?;
        tracing::info!(%id, name = %new.name, has_embedding = new.embedding.is_some(), "person enrolled");

        Ok(Person {
            id,
            name: new.name,
            description: new.description,
            image_ref: new.image_ref,
            embedding: new.embedding,
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    /// Replace a person's embedding. Returns false if the id is unknown.
    pub fn re_enroll(&self, id: &str, embedding: &Embedding) -> Result<bool, StoreError> {
        let json = serde_json::to_string(&embedding.values)?;
        let changed = self.conn.execute(
            "UPDATE persons SET embedding = ?2, extractor_version = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, json, embedding.extractor_version, now()],
        )?;
        if changed > 0 {
            tracing::info!(%id, dimension = embedding.len(), "person re-enrolled");
        }
        Ok(changed > 0)
    }

    /// Change name and/or description. Returns false if the id is unknown.
    pub fn update_person(&self, id: &str, update: &PersonUpdate) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE persons SET name = COALESCE(?2, name), description = COALESCE(?3, description),
                updated_at = ?4 WHERE id = ?1",
            params![id, update.name, update.description, now()],
        )?;
        if changed > 0 {
            tracing::info!(%id, "person updated");
        }
        Ok(changed > 0)
    }

    /// Delete a person and its embedding permanently.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let changed = self.conn.execute("DELETE FROM persons WHERE id = ?1", params![id])?;
        if changed > 0 {
            tracing::info!(%id, "person removed");
        }
        Ok(changed > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<Person>, StoreError> {
        let sql = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], PersonRow::from_row)
            .optional()?;
        Ok(row.map(PersonRow::into_person))
    }

    /// All persons in insertion order.
    pub fn list(&self) -> Result<Vec<Person>, StoreError> {
        let sql = format!("SELECT {PERSON_COLUMNS} FROM persons ORDER BY rowid");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], PersonRow::from_row)?;
        let mut persons = Vec::new();
        for row in rows {
            persons.push(row?.into_person());
        }
        Ok(persons)
    }

    /// Every person with a stored embedding, in insertion order.
    ///
    /// Rows whose embedding fails to decode are reported in `rejected`
    /// instead of failing the whole read.
    pub fn gallery(&self) -> Result<GallerySnapshot, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, embedding, extractor_version FROM persons
             WHERE embedding IS NOT NULL ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut snapshot = GallerySnapshot::default();
        for row in rows {
            let (id, name, json, version) = row?;
            match decode_embedding(&json, version) {
                Ok(embedding) => snapshot.entries.push(GalleryEntry { id, name, embedding }),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "rejecting gallery row");
                    snapshot.rejected.push(RejectedRow {
                        id,
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(snapshot)
    }

    /// Insert or update gallery entries in one transaction.
    ///
    /// Entries keep their id when present; an existing id is re-enrolled with
    /// the imported name and embedding. An entry without an embedding only
    /// renames an existing person. Empty ids get a fresh UUID.
    pub fn import(&mut self, entries: &[GalleryEntry], image_ref: &str) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let ts = now();
        for entry in entries {
            let id = if entry.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                entry.id.clone()
            };
            let json = (!entry.embedding.is_empty())
                .then(|| serde_json::to_string(&entry.embedding.values))
                .transpose()?;
            tx.execute(
                "INSERT INTO persons (id, name, image_ref, embedding, extractor_version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    embedding = COALESCE(excluded.embedding, persons.embedding),
                    extractor_version = CASE WHEN excluded.embedding IS NULL
                        THEN persons.extractor_version ELSE excluded.extractor_version END,
                    updated_at = excluded.updated_at",
                params![id, entry.name, image_ref, json, entry.embedding.extractor_version, ts],
            )?;
        }
        tx.commit()?;
        tracing::info!(count = entries.len(), "gallery imported");
        Ok(entries.len())
    }

    pub fn log_detection(&self, log: &NewDetectionLog) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO detection_logs (person_id, person_name, confidence, face_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![log.person_id, log.person_name, log.confidence, log.face_count, now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent detection logs first.
    pub fn recent_logs(&self, limit: u32) -> Result<Vec<DetectionLog>, StoreError> {
        self.query_logs(
            &format!("SELECT {LOG_COLUMNS} FROM detection_logs ORDER BY id DESC LIMIT ?1"),
            params![limit],
        )
    }

    /// Most recent logs attributed to one person.
    pub fn logs_by_person(&self, person_id: &str, limit: u32) -> Result<Vec<DetectionLog>, StoreError> {
        self.query_logs(
            &format!(
                "SELECT {LOG_COLUMNS} FROM detection_logs WHERE person_id = ?1 ORDER BY id DESC LIMIT ?2"
            ),
            params![person_id, limit],
        )
    }

    fn query_logs(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<DetectionLog>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(DetectionLog {
                id: row.get(0)?,
                person_id: row.get(1)?,
                person_name: row.get(2)?,
                confidence: row.get(3)?,
                face_count: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn count(&self, sql: &str, params: impl rusqlite::Params) -> Result<u64, StoreError> {
        let n: i64 = self.conn.query_row(sql, params, |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    pub fn count_persons(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM persons", [])
    }

    pub fn count_detection_logs(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM detection_logs", [])
    }

    /// Logs written since 00:00 UTC today.
    pub fn count_today_detection_logs(&self) -> Result<u64, StoreError> {
        self.count(
            "SELECT COUNT(*) FROM detection_logs WHERE created_at >= ?1",
            params![utc_day(0)],
        )
    }

    pub fn overview(&self) -> Result<Overview, StoreError> {
        Ok(Overview {
            persons: self.count_persons()?,
            detection_logs: self.count_detection_logs()?,
            today_logs: self.count_today_detection_logs()?,
        })
    }

    /// Per-day log counts over the last `days` UTC days (today included),
    /// oldest first. Days without logs are omitted.
    pub fn daily_log_counts(&self, days: u32) -> Result<Vec<DailyCount>, StoreError> {
        if days == 0 {
            return Ok(Vec::new());
        }
        let since = utc_day(i64::from(days) - 1);
        let mut stmt = self.conn.prepare(
            "SELECT substr(created_at, 1, 10) AS day, COUNT(*) FROM detection_logs
             WHERE created_at >= ?1 GROUP BY day ORDER BY day",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok(DailyCount {
                date: row.get(0)?,
                count: row.get::<_, i64>(1)?.max(0) as u64,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Audit the stored gallery. Rows with undecodable embeddings count as
    /// invalid entries.
    pub fn audit(&self, min_quality: f32) -> Result<AuditReport, StoreError> {
        let snapshot = self.gallery()?;
        let mut report = audit_gallery(&snapshot.entries, min_quality);
        for row in snapshot.rejected {
            report.total += 1;
            report.invalid += 1;
            report.problems.push(AuditProblem {
                id: row.id,
                name: row.name,
                problem: row.reason,
            });
        }
        report.success = report.valid > 0 && report.invalid == 0;
        Ok(report)
    }
}
