use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::OffsetDateTime;

use crate::config::{ConfigPaths, StorageOptions};
use crate::filter::{FileCategory, FileFilter};

mod schema;

#[derive(Clone)]
pub struct PreferenceStore {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl PreferenceStore {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening preferences {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("reading preference {key}"))
        })
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("decoding preference {key}"))?;
        Ok(Some(value))
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("encoding preference {key}"))?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, raw, now],
            )
            .with_context(|| format!("writing preference {key}"))?;
            Ok(())
        })
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let removed = conn
                .execute("DELETE FROM preferences WHERE key = ?1", [key])
                .with_context(|| format!("removing preference {key}"))?;
            Ok(removed > 0)
        })
    }

    /// Unix seconds of the last write to `key`.
    pub fn updated_at(&self, key: &str) -> Result<Option<i64>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT updated_at FROM preferences WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("reading preference timestamp {key}"))
        })
    }

    /// The persisted filter, or the defaults for the scope when nothing
    /// usable is stored. An unreadable entry is logged and ignored.
    pub fn load_filter(
        &self,
        key: &str,
        global_scope: bool,
        default_type: FileCategory,
    ) -> Result<FileFilter> {
        let defaults = FileFilter {
            category: Some(default_type),
            ..FileFilter::defaults_for(global_scope)
        };
        match self.get_json::<FileFilter>(key) {
            Ok(Some(mut filter)) => {
                if global_scope {
                    filter.offline = true;
                }
                Ok(filter)
            }
            Ok(None) => Ok(defaults),
            Err(err) => {
                tracing::warn!(key, error = %format!("{err:#}"), "ignoring unreadable stored filter");
                Ok(defaults)
            }
        }
    }

    pub fn save_filter(&self, key: &str, filter: &FileFilter) -> Result<()> {
        self.set_json(key, filter)?;
        tracing::debug!(key, chips = ?filter.chips(), "filter saved");
        Ok(())
    }

    pub fn clear_filter(&self, key: &str) -> Result<bool> {
        self.remove(key)
    }
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<PreferenceStore> {
    let db_path = if storage.preferences_path.as_os_str().is_empty() {
        &paths.preferences_path
    } else {
        &storage.preferences_path
    };
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening preferences {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    Ok(PreferenceStore {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.busy_timeout(Duration::from_millis(storage.busy_timeout_ms))
        .context("setting busy timeout")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}
