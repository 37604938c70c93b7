//! SQLite persistence for photos, labels and calendar events.
//!
//! The schema is created when the pool opens. Queries are plain runtime
//! `sqlx::query` calls with bound parameters.

mod calendar;
mod photos;

use std::path::Path;
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, info};

pub use photos::NewPhoto;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS photos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        unique_name TEXT,
        description TEXT,
        image_url TEXT NOT NULL,
        content_hash TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_photos_content_hash ON photos (content_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS photo_labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        photo_id INTEGER NOT NULL REFERENCES photos (id) ON DELETE CASCADE,
        label TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_photo_labels_photo_id ON photo_labels (photo_id)",
    r#"
    CREATE TABLE IF NOT EXISTS calendar_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        description TEXT,
        date_time TEXT NOT NULL,
        type TEXT NOT NULL,
        priority TEXT NOT NULL,
        category TEXT,
        location TEXT,
        is_all_day INTEGER NOT NULL DEFAULT 0,
        reminder_minutes INTEGER,
        recurrence_pattern TEXT,
        recurrence_end_date TEXT,
        is_completed INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_calendar_events_date_time ON calendar_events (date_time)",
];

/// Creates the directory holding a file-backed SQLite database.
///
/// In-memory URLs are left alone.
pub async fn ensure_database_dir(url: &str) -> std::io::Result<()> {
    let Some(file) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };
    let file = file.split('?').next().unwrap_or_default();
    if file.is_empty() || file.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(file).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
        debug!(dir = %parent.display(), "database directory ready");
    }
    Ok(())
}

/// Handle to the application database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if needed) the database at `url` and applies the schema.
    pub async fn connect(url: &str, max_connections: u32) -> sqlx::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "database ready");
        Ok(store)
    }

    /// A private in-memory database, mostly for tests.
    ///
    /// Limited to one connection that never idles out, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> sqlx::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> sqlx::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(statements = SCHEMA.len(), "schema applied");
        Ok(())
    }
}
