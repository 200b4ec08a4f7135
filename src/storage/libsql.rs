//! LibSQL storage backend implementation
//!
//! Persists projects, variables, flags and interval statistics using
//! Turso/libSQL. Uniqueness of natural keys is enforced by table constraints;
//! the conflict-tolerant insert and the additive upsert are single
//! statements, so they stay atomic under concurrent writers.

use crate::error::{FlagfeedError, Result};
use crate::storage::FeedbackStorage;
use crate::types::{EntityKey, EntityKind, FlagId, StatisticsRow, VariableType, MAX_COUNT};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Builder, Connection, Database};
use tracing::{debug, info};
use uuid::Uuid;

/// Embedded schema migrations, applied in order
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial_schema.sql",
        include_str!("../../migrations/libsql/001_initial_schema.sql"),
    ),
    (
        "002_add_indexes.sql",
        include_str!("../../migrations/libsql/002_add_indexes.sql"),
    ),
];

/// Split a migration file into statements, dropping `--` comment lines
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let body = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    body.split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

/// Database connection mode
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// In-memory database (for testing and dry runs)
    InMemory,
    /// Remote database (Turso Cloud)
    Remote { url: String, token: String },
}

impl ConnectionMode {
    /// Parse a configured database path
    ///
    /// - ":memory:" → InMemory
    /// - "libsql://..." → Remote (token from `TURSO_AUTH_TOKEN`)
    /// - anything else → Local file path
    pub fn from_path(database_url: &str) -> Result<Self> {
        if database_url == ":memory:" {
            Ok(ConnectionMode::InMemory)
        } else if database_url.starts_with("libsql://") {
            let token = std::env::var("TURSO_AUTH_TOKEN")
                .map_err(|_| FlagfeedError::Other("TURSO_AUTH_TOKEN not found".into()))?;
            Ok(ConnectionMode::Remote {
                url: database_url.to_string(),
                token,
            })
        } else {
            Ok(ConnectionMode::Local(database_url.to_string()))
        }
    }
}

/// LibSQL storage backend
///
/// Holds one shared connection. libSQL's `:memory:` databases are private to
/// the connection that opened them, and a single serialized connection also
/// keeps concurrent writers from tripping over `SQLITE_BUSY`.
pub struct LibsqlStorage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl LibsqlStorage {
    /// Validate an existing database file before opening it
    ///
    /// Returns `Ok(false)` if the file does not exist yet.
    fn validate_database_file(db_path: &str) -> Result<bool> {
        use std::fs::File;
        use std::io::Read;
        use std::path::Path;

        let path = Path::new(db_path);
        if !path.exists() {
            return Ok(false);
        }

        let metadata = std::fs::metadata(path)?;
        if metadata.len() == 0 {
            // Freshly created empty file; SQLite initialises it on first write
            return Ok(true);
        }

        // SQLite files start with "SQLite format 3\0" (16 bytes)
        let mut header = [0u8; 16];
        let mut file = File::open(path).map_err(|e| {
            FlagfeedError::Database(format!("Cannot read database file at '{}': {}", db_path, e))
        })?;
        if file.read_exact(&mut header).is_err() || &header != b"SQLite format 3\0" {
            return Err(FlagfeedError::Database(format!(
                "Database file at '{}' is corrupted or not a valid SQLite database",
                db_path
            )));
        }

        debug!("Database file validation passed: {}", db_path);
        Ok(true)
    }

    /// Open (creating if needed) a database and apply pending migrations
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        info!("Connecting to LibSQL database: {:?}", mode);

        let db = match mode {
            ConnectionMode::Local(ref path) => {
                Self::validate_database_file(path)?;
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            FlagfeedError::Database(format!(
                                "Failed to create database directory {}: {}",
                                parent.display(),
                                e
                            ))
                        })?;
                    }
                }

                Builder::new_local(path).build().await.map_err(|e| {
                    FlagfeedError::Database(format!("Failed to create local database: {}", e))
                })?
            }
            ConnectionMode::InMemory => Builder::new_local(":memory:").build().await.map_err(|e| {
                FlagfeedError::Database(format!("Failed to create in-memory database: {}", e))
            })?,
            ConnectionMode::Remote { ref url, ref token } => {
                Builder::new_remote(url.clone(), token.clone())
                    .build()
                    .await
                    .map_err(|e| {
                        FlagfeedError::Database(format!("Failed to create remote database: {}", e))
                    })?
            }
        };

        let conn = db
            .connect()
            .map_err(|e| FlagfeedError::Database(format!("Failed to get connection: {}", e)))?;

        info!("LibSQL database connection established");

        let storage = Self { db, conn };
        storage.verify_database_health().await?;
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create from a configured path string
    pub async fn from_path(database_url: &str) -> Result<Self> {
        Self::new(ConnectionMode::from_path(database_url)?).await
    }

    /// Verify the database answers queries and accepts writes
    async fn verify_database_health(&self) -> Result<()> {
        self.conn.query("SELECT 1", params![]).await.map_err(|e| {
            FlagfeedError::Database(format!(
                "Database corruption detected or invalid database file: {}",
                e
            ))
        })?;

        let write_test = r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS _health_check (id INTEGER PRIMARY KEY);
            DROP TABLE IF EXISTS _health_check;
        "#;

        if let Err(e) = self.conn.execute_batch(write_test).await {
            let error_msg = e.to_string().to_lowercase();
            if error_msg.contains("readonly") || error_msg.contains("permission") {
                return Err(FlagfeedError::Database(format!(
                    "Database is read-only or lacks write permissions: {}",
                    e
                )));
            }
            return Err(FlagfeedError::Database(format!("Database write test failed: {}", e)));
        }

        debug!("Database health check passed");
        Ok(())
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS _migrations_applied (
                    migration_name TEXT PRIMARY KEY,
                    applied_at INTEGER NOT NULL
                )",
                params![],
            )
            .await
            .map_err(|e| {
                FlagfeedError::Migration(format!("Failed to create migrations table: {}", e))
            })?;

        for (migration_file, sql) in MIGRATIONS {
            let mut rows = self
                .conn
                .query(
                    "SELECT COUNT(*) FROM _migrations_applied WHERE migration_name = ?",
                    params![*migration_file],
                )
                .await?;

            let already_applied = if let Some(row) = rows.next().await? {
                row.get::<i64>(0).unwrap_or(0)
            } else {
                0
            };

            if already_applied > 0 {
                debug!("Skipping already applied migration: {}", migration_file);
                continue;
            }

            let statements = parse_sql_statements(sql);
            debug!("Parsed {} statements from {}", statements.len(), migration_file);
            for (i, statement) in statements.iter().enumerate() {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                self.conn.execute(statement, params![]).await.map_err(|e| {
                    FlagfeedError::Migration(format!(
                        "Failed to execute statement #{} in {}: {}\nStatement: {}",
                        i + 1,
                        migration_file,
                        e,
                        &statement[..statement.len().min(300)]
                    ))
                })?;
            }

            self.conn
                .execute(
                    "INSERT INTO _migrations_applied (migration_name, applied_at) VALUES (?, ?)",
                    params![*migration_file, Utc::now().timestamp()],
                )
                .await
                .map_err(|e| FlagfeedError::Migration(format!("Failed to record migration: {}", e)))?;

            info!("Executed migration: {}", migration_file);
        }

        info!("Database migrations completed");
        Ok(())
    }

    fn scope_of(key: &EntityKey) -> Result<String> {
        key.scope
            .map(|scope| scope.to_string())
            .ok_or_else(|| FlagfeedError::Validation(format!("{} requires a project scope", key)))
    }

    /// Counts saturate at [`MAX_COUNT`], the largest value an INTEGER column holds
    fn stored_count(value: u64) -> i64 {
        i64::try_from(value.min(MAX_COUNT)).unwrap_or(i64::MAX)
    }

    fn parse_id(raw: &str) -> Result<Uuid> {
        Uuid::parse_str(raw)
            .map_err(|e| FlagfeedError::Database(format!("Malformed identifier {:?}: {}", raw, e)))
    }

    fn interval_from_secs(secs: i64) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| FlagfeedError::Database(format!("Interval out of range: {}", secs)))
    }

    fn row_to_statistics(row: &libsql::Row) -> Result<StatisticsRow> {
        let flag: String = row.get(0)?;
        let interval: i64 = row.get(1)?;
        let positive: i64 = row.get(2)?;
        let negative: i64 = row.get(3)?;

        Ok(StatisticsRow {
            flag_id: FlagId(Self::parse_id(&flag)?),
            interval: Self::interval_from_secs(interval)?,
            positive_count: positive.max(0) as u64,
            negative_count: negative.max(0) as u64,
        })
    }
}

#[async_trait]
impl FeedbackStorage for LibsqlStorage {
    async fn select_id(&self, key: &EntityKey) -> Result<Option<Uuid>> {
        let mut rows = match key.kind {
            EntityKind::Project => {
                self.conn
                    .query("SELECT id FROM projects WHERE name = ?1", params![key.name.as_str()])
                    .await?
            }
            EntityKind::Variable => {
                self.conn
                    .query(
                        "SELECT id FROM variables WHERE project = ?1 AND name = ?2",
                        params![Self::scope_of(key)?, key.name.as_str()],
                    )
                    .await?
            }
            EntityKind::Flag => {
                self.conn
                    .query(
                        "SELECT id FROM flags WHERE project = ?1 AND name = ?2",
                        params![Self::scope_of(key)?, key.name.as_str()],
                    )
                    .await?
            }
        };

        match rows.next().await? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(Self::parse_id(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_if_absent(
        &self,
        key: &EntityKey,
        id: Uuid,
        var_type: Option<VariableType>,
    ) -> Result<bool> {
        let changed = match key.kind {
            EntityKind::Project => {
                self.conn
                    .execute(
                        "INSERT INTO projects (id, name, version) VALUES (?1, ?2, 0)
                         ON CONFLICT DO NOTHING",
                        params![id.to_string(), key.name.as_str()],
                    )
                    .await?
            }
            EntityKind::Variable => {
                let var_type = var_type.ok_or_else(|| {
                    FlagfeedError::Validation(format!("{} requires a declared type", key))
                })?;
                self.conn
                    .execute(
                        "INSERT INTO variables (id, project, name, type) VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT DO NOTHING",
                        params![
                            id.to_string(),
                            Self::scope_of(key)?,
                            key.name.as_str(),
                            var_type.as_str()
                        ],
                    )
                    .await?
            }
            EntityKind::Flag => {
                self.conn
                    .execute(
                        "INSERT INTO flags (id, project, name) VALUES (?1, ?2, ?3)
                         ON CONFLICT DO NOTHING",
                        params![id.to_string(), Self::scope_of(key)?, key.name.as_str()],
                    )
                    .await?
            }
        };

        Ok(changed > 0)
    }

    async fn upsert_additive(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
        positive_delta: u64,
        negative_delta: u64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO statistics (flag, interval, positive_count, negative_count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(flag, interval) DO UPDATE SET
                     positive_count = MIN(statistics.positive_count, ?5 - excluded.positive_count)
                         + excluded.positive_count,
                     negative_count = MIN(statistics.negative_count, ?5 - excluded.negative_count)
                         + excluded.negative_count",
                params![
                    flag_id.to_string(),
                    interval.timestamp(),
                    Self::stored_count(positive_delta),
                    Self::stored_count(negative_delta),
                    Self::stored_count(MAX_COUNT)
                ],
            )
            .await?;

        Ok(())
    }

    async fn get_statistics(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
    ) -> Result<Option<StatisticsRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT flag, interval, positive_count, negative_count
                 FROM statistics WHERE flag = ?1 AND interval = ?2",
                params![flag_id.to_string(), interval.timestamp()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_statistics(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_statistics(&self, flag_id: FlagId) -> Result<Vec<StatisticsRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT flag, interval, positive_count, negative_count
                 FROM statistics WHERE flag = ?1 ORDER BY interval ASC",
                params![flag_id.to_string()],
            )
            .await?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().await? {
            result.push(Self::row_to_statistics(&row)?);
        }
        Ok(result)
    }
}
