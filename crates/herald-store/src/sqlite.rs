//! SQLite implementation of the [`Store`] trait.
//!
//! The database file is created with owner-only permissions, WAL mode is
//! enabled, and the schema is managed through strictly-increasing
//! migrations recorded in a `schema_version` table.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use herald_types::HeraldError;

use crate::records::{AuthCodeRecord, TaskEventRecord, TaskFilter, TaskRecord, TokenRecord};
use crate::Store;

/// Migrations applied in order; `schema_version` records the last applied
/// index + 1. Never edit an entry in place -- append a new one.
const MIGRATIONS: &[&str] = &[
    // v1: core tables
    "CREATE TABLE tasks (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL DEFAULT 'dispatched',
        project TEXT NOT NULL,
        prompt TEXT NOT NULL,
        status TEXT NOT NULL,
        priority TEXT NOT NULL,
        session_id TEXT NOT NULL DEFAULT '',
        pid INTEGER NOT NULL DEFAULT 0,
        git_branch TEXT NOT NULL DEFAULT '',
        output TEXT NOT NULL DEFAULT '',
        progress TEXT NOT NULL DEFAULT '',
        error TEXT NOT NULL DEFAULT '',
        cost_usd REAL NOT NULL DEFAULT 0,
        turns INTEGER NOT NULL DEFAULT 0,
        timeout_minutes INTEGER NOT NULL DEFAULT 0,
        dry_run INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT '',
        started_at TEXT NOT NULL DEFAULT '',
        completed_at TEXT NOT NULL DEFAULT ''
    );
    CREATE INDEX idx_tasks_status ON tasks(status);
    CREATE INDEX idx_tasks_project ON tasks(project);
    CREATE INDEX idx_tasks_created ON tasks(created_at);

    CREATE TABLE task_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX idx_events_task ON task_events(task_id);

    CREATE TABLE oauth_tokens (
        token_hash TEXT PRIMARY KEY,
        token_type TEXT NOT NULL,
        client_id TEXT NOT NULL,
        scope TEXT NOT NULL DEFAULT '',
        expires_at TEXT NOT NULL,
        revoked INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE TABLE oauth_codes (
        code_hash TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        redirect_uri TEXT NOT NULL,
        code_challenge TEXT NOT NULL,
        scope TEXT NOT NULL DEFAULT '',
        expires_at TEXT NOT NULL,
        used INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );",
    // v2: linked-session context fields
    "ALTER TABLE tasks ADD COLUMN context TEXT NOT NULL DEFAULT '';
     ALTER TABLE tasks ADD COLUMN files_modified TEXT NOT NULL DEFAULT '[]';
     CREATE INDEX idx_tasks_session ON tasks(session_id);",
];

const TASK_COLUMNS: &str = "id, kind, project, prompt, context, status, priority, session_id, \
     pid, git_branch, output, progress, error, cost_usd, turns, files_modified, \
     timeout_minutes, dry_run, created_at, started_at, completed_at";

/// SQLite-backed [`Store`]. The connection is serialized behind a mutex;
/// SQLite itself handles one writer at a time.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    retention_days: u32,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run pending migrations.
    ///
    /// The parent directory is created `0700` and the file `0600` before
    /// SQLite touches it.
    pub fn open(path: &Path, retention_days: u32) -> Result<Self, HeraldError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                create_private_dir(dir)?;
            }
        }
        create_private_file(path)?;

        let conn = Connection::open(path)
            .map_err(|e| HeraldError::Store(format!("opening database: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| HeraldError::Store(format!("enabling WAL: {e}")))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| HeraldError::Store(format!("setting busy timeout: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| HeraldError::Store(format!("enabling foreign keys: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
            retention_days,
        };
        store.migrate()?;

        Ok(store)
    }

    fn migrate(&self) -> Result<(), HeraldError> {
        let conn = self.lock();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .map_err(|e| HeraldError::Store(format!("creating schema_version: {e}")))?;

        let current: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(|e| HeraldError::Store(format!("reading schema version: {e}")))?;

        for (i, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let version = i as i64 + 1;
            info!(version, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| HeraldError::Store(format!("migration {version}: {e}")))?;
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
                .map_err(|e| HeraldError::Store(format!("recording migration {version}: {e}")))?;
        }

        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-statement; propagating the
        // inner guard is still sound for SQLite.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for SqliteStore {
    fn create_task(&self, t: &TaskRecord) -> Result<(), HeraldError> {
        self.lock()
            .execute(
                &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"),
                params![
                    t.id,
                    t.kind,
                    t.project,
                    t.prompt,
                    t.context,
                    t.status,
                    t.priority,
                    t.session_id,
                    t.pid,
                    t.git_branch,
                    t.output,
                    t.progress,
                    t.error,
                    t.cost_usd,
                    t.turns,
                    encode_files(&t.files_modified),
                    t.timeout_minutes,
                    t.dry_run as i64,
                    format_time(t.created_at),
                    format_time(t.started_at),
                    format_time(t.completed_at),
                ],
            )
            .map_err(|e| HeraldError::Store(format!("inserting task: {e}")))?;
        Ok(())
    }

    fn get_task(&self, id: &str) -> Result<TaskRecord, HeraldError> {
        self.lock()
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id],
                scan_task,
            )
            .optional()
            .map_err(|e| HeraldError::Store(format!("getting task: {e}")))?
            .ok_or_else(|| HeraldError::NotFound(format!("task {id:?}")))
    }

    fn update_task(&self, t: &TaskRecord) -> Result<(), HeraldError> {
        self.lock()
            .execute(
                "UPDATE tasks SET
                    status = ?1, priority = ?2, session_id = ?3, pid = ?4,
                    git_branch = ?5, output = ?6, progress = ?7, error = ?8,
                    cost_usd = ?9, turns = ?10, files_modified = ?11, context = ?12,
                    timeout_minutes = ?13, dry_run = ?14,
                    started_at = ?15, completed_at = ?16
                 WHERE id = ?17",
                params![
                    t.status,
                    t.priority,
                    t.session_id,
                    t.pid,
                    t.git_branch,
                    t.output,
                    t.progress,
                    t.error,
                    t.cost_usd,
                    t.turns,
                    encode_files(&t.files_modified),
                    t.context,
                    t.timeout_minutes,
                    t.dry_run as i64,
                    format_time(t.started_at),
                    format_time(t.completed_at),
                    t.id,
                ],
            )
            .map_err(|e| HeraldError::Store(format!("updating task: {e}")))?;
        Ok(())
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, HeraldError> {
        let mut query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.status.is_empty() && filter.status != "all" {
            query.push_str(" AND status = ?");
            args.push(Box::new(filter.status.clone()));
        }
        if !filter.project.is_empty() {
            query.push_str(" AND project = ?");
            args.push(Box::new(filter.project.clone()));
        }
        if let Some(since) = filter.since {
            query.push_str(" AND created_at >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }

        query.push_str(" ORDER BY created_at DESC");

        if filter.limit > 0 {
            query.push_str(" LIMIT ?");
            args.push(Box::new(filter.limit as i64));
        }

        let conn = self.lock();
        let mut stmt = conn
            .prepare(&query)
            .map_err(|e| HeraldError::Store(format!("listing tasks: {e}")))?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt
            .query_map(&param_refs[..], scan_task)
            .map_err(|e| HeraldError::Store(format!("listing tasks: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| HeraldError::Store(format!("scanning task: {e}")))
    }

    fn get_linked_task_by_session(&self, session_id: &str) -> Result<TaskRecord, HeraldError> {
        self.lock()
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE kind = 'linked' AND session_id = ?1
                     ORDER BY created_at DESC LIMIT 1"
                ),
                [session_id],
                scan_task,
            )
            .optional()
            .map_err(|e| HeraldError::Store(format!("getting linked task: {e}")))?
            .ok_or_else(|| HeraldError::NotFound(format!("linked task for session {session_id:?}")))
    }

    fn add_event(&self, e: &TaskEventRecord) -> Result<(), HeraldError> {
        self.lock()
            .execute(
                "INSERT INTO task_events (task_id, event_type, message, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![e.task_id, e.event_type, e.message, e.created_at.to_rfc3339()],
            )
            .map_err(|e| HeraldError::Store(format!("adding event: {e}")))?;
        Ok(())
    }

    fn list_events(&self, task_id: &str, limit: usize) -> Result<Vec<TaskEventRecord>, HeraldError> {
        let mut query = String::from(
            "SELECT id, task_id, event_type, message, created_at
             FROM task_events WHERE task_id = ?1 ORDER BY id DESC",
        );
        if limit > 0 {
            query.push_str(" LIMIT ?2");
        }

        let conn = self.lock();
        let mut stmt = conn
            .prepare(&query)
            .map_err(|e| HeraldError::Store(format!("listing events: {e}")))?;

        let map = |row: &Row| -> rusqlite::Result<TaskEventRecord> {
            Ok(TaskEventRecord {
                id: row.get(0)?,
                task_id: row.get(1)?,
                event_type: row.get(2)?,
                message: row.get(3)?,
                created_at: parse_time(&row.get::<_, String>(4)?).unwrap_or_default(),
            })
        };

        let rows = if limit > 0 {
            stmt.query_map(params![task_id, limit as i64], map)
        } else {
            stmt.query_map(params![task_id], map)
        }
        .map_err(|e| HeraldError::Store(format!("listing events: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| HeraldError::Store(format!("scanning event: {e}")))
    }

    fn store_token(&self, t: &TokenRecord) -> Result<(), HeraldError> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO oauth_tokens
                    (token_hash, token_type, client_id, scope, expires_at, revoked, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    t.token_hash,
                    t.token_type,
                    t.client_id,
                    t.scope,
                    t.expires_at.to_rfc3339(),
                    t.revoked as i64,
                    t.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| HeraldError::Store(format!("storing token: {e}")))?;
        Ok(())
    }

    fn get_token(&self, token_hash: &str) -> Result<TokenRecord, HeraldError> {
        let record = self
            .lock()
            .query_row(
                "SELECT token_hash, token_type, client_id, scope, expires_at, revoked, created_at
                 FROM oauth_tokens WHERE token_hash = ?1",
                [token_hash],
                |row| {
                    Ok(TokenRecord {
                        token_hash: row.get(0)?,
                        token_type: row.get(1)?,
                        client_id: row.get(2)?,
                        scope: row.get(3)?,
                        expires_at: parse_time(&row.get::<_, String>(4)?).unwrap_or_default(),
                        revoked: row.get::<_, i64>(5)? != 0,
                        created_at: parse_time(&row.get::<_, String>(6)?).unwrap_or_default(),
                    })
                },
            )
            .optional()
            .map_err(|e| HeraldError::Store(format!("getting token: {e}")))?
            .ok_or_else(|| HeraldError::NotFound("token".into()))?;

        if record.revoked {
            return Err(HeraldError::Auth("token revoked".into()));
        }
        if Utc::now() > record.expires_at {
            return Err(HeraldError::Auth("token expired".into()));
        }

        Ok(record)
    }

    fn revoke_token(&self, token_hash: &str) -> Result<(), HeraldError> {
        self.lock()
            .execute(
                "UPDATE oauth_tokens SET revoked = 1 WHERE token_hash = ?1",
                [token_hash],
            )
            .map_err(|e| HeraldError::Store(format!("revoking token: {e}")))?;
        Ok(())
    }

    fn store_auth_code(&self, c: &AuthCodeRecord) -> Result<(), HeraldError> {
        self.lock()
            .execute(
                "INSERT INTO oauth_codes
                    (code_hash, client_id, redirect_uri, code_challenge, scope, expires_at, used, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    c.code_hash,
                    c.client_id,
                    c.redirect_uri,
                    c.code_challenge,
                    c.scope,
                    c.expires_at.to_rfc3339(),
                    c.used as i64,
                    c.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| HeraldError::Store(format!("storing auth code: {e}")))?;
        Ok(())
    }

    fn consume_auth_code(&self, code_hash: &str) -> Result<AuthCodeRecord, HeraldError> {
        let conn = self.lock();

        let record = conn
            .query_row(
                "SELECT code_hash, client_id, redirect_uri, code_challenge, scope, expires_at, used, created_at
                 FROM oauth_codes WHERE code_hash = ?1",
                [code_hash],
                |row| {
                    Ok(AuthCodeRecord {
                        code_hash: row.get(0)?,
                        client_id: row.get(1)?,
                        redirect_uri: row.get(2)?,
                        code_challenge: row.get(3)?,
                        scope: row.get(4)?,
                        expires_at: parse_time(&row.get::<_, String>(5)?).unwrap_or_default(),
                        used: row.get::<_, i64>(6)? != 0,
                        created_at: parse_time(&row.get::<_, String>(7)?).unwrap_or_default(),
                    })
                },
            )
            .optional()
            .map_err(|e| HeraldError::Store(format!("getting auth code: {e}")))?
            .ok_or_else(|| HeraldError::NotFound("authorization code".into()))?;

        if Utc::now() > record.expires_at {
            return Err(HeraldError::Auth("authorization code expired".into()));
        }

        // Conditional update makes consumption single-use even under
        // concurrent callers: only one caller sees an affected row.
        let affected = conn
            .execute(
                "UPDATE oauth_codes SET used = 1 WHERE code_hash = ?1 AND used = 0",
                [code_hash],
            )
            .map_err(|e| HeraldError::Store(format!("marking code used: {e}")))?;

        if affected == 0 {
            return Err(HeraldError::Auth("authorization code already used".into()));
        }

        Ok(record)
    }

    fn average_task_duration(&self, project: &str) -> Result<(Duration, usize), HeraldError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT started_at, completed_at FROM tasks
                 WHERE project = ?1 AND status = 'completed'
                   AND started_at != '' AND completed_at != ''",
            )
            .map_err(|e| HeraldError::Store(format!("querying durations: {e}")))?;

        let rows = stmt
            .query_map([project], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| HeraldError::Store(format!("querying durations: {e}")))?;

        let mut total = Duration::ZERO;
        let mut count = 0usize;
        for row in rows {
            let (started, completed) =
                row.map_err(|e| HeraldError::Store(format!("scanning duration: {e}")))?;
            let (Some(started), Some(completed)) = (parse_time(&started), parse_time(&completed))
            else {
                continue;
            };
            let elapsed = (completed - started).to_std().unwrap_or(Duration::ZERO);
            total += elapsed;
            count += 1;
        }

        if count == 0 {
            return Ok((Duration::ZERO, 0));
        }
        Ok((total / count as u32, count))
    }

    fn cleanup(&self) -> Result<(), HeraldError> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let conn = self.lock();

        conn.execute(
            "DELETE FROM oauth_codes WHERE expires_at < ?1 OR used = 1",
            [&now_str],
        )
        .map_err(|e| HeraldError::Store(format!("cleaning codes: {e}")))?;

        conn.execute(
            "DELETE FROM oauth_tokens WHERE expires_at < ?1 OR revoked = 1",
            [&now_str],
        )
        .map_err(|e| HeraldError::Store(format!("cleaning tokens: {e}")))?;

        if self.retention_days > 0 {
            let cutoff = (now - chrono::Duration::days(self.retention_days as i64)).to_rfc3339();
            conn.execute(
                "DELETE FROM task_events WHERE task_id IN
                    (SELECT id FROM tasks WHERE completed_at != '' AND completed_at < ?1)",
                [&cutoff],
            )
            .map_err(|e| HeraldError::Store(format!("cleaning task events: {e}")))?;
            conn.execute(
                "DELETE FROM tasks WHERE completed_at != '' AND completed_at < ?1",
                [&cutoff],
            )
            .map_err(|e| HeraldError::Store(format!("cleaning tasks: {e}")))?;
        }

        Ok(())
    }
}

fn scan_task(row: &Row) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        project: row.get(2)?,
        prompt: row.get(3)?,
        context: row.get(4)?,
        status: row.get(5)?,
        priority: row.get(6)?,
        session_id: row.get(7)?,
        pid: row.get(8)?,
        git_branch: row.get(9)?,
        output: row.get(10)?,
        progress: row.get(11)?,
        error: row.get(12)?,
        cost_usd: row.get(13)?,
        turns: row.get(14)?,
        files_modified: decode_files(&row.get::<_, String>(15)?),
        timeout_minutes: row.get(16)?,
        dry_run: row.get::<_, i64>(17)? != 0,
        created_at: parse_time(&row.get::<_, String>(18)?),
        started_at: parse_time(&row.get::<_, String>(19)?),
        completed_at: parse_time(&row.get::<_, String>(20)?),
    })
}

fn format_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.into())
}

/// files_modified is stored as a JSON array in a TEXT column.
fn encode_files(files: &[String]) -> String {
    serde_json::to_string(files).unwrap_or_else(|_| "[]".into())
}

fn decode_files(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn create_private_dir(dir: &Path) -> Result<(), HeraldError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| HeraldError::Store(format!("creating database directory: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| HeraldError::Store(format!("restricting database directory: {e}")))?;
    }
    Ok(())
}

fn create_private_file(path: &Path) -> Result<(), HeraldError> {
    if path.exists() {
        return Ok(());
    }

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
        .map(|_| ())
        .map_err(|e| HeraldError::Store(format!("creating database file: {e}")))
}
