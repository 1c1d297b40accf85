// SQLite-backed moderation store.
//
// Tables:
// - violations: token -> (count, window_start), keyed by the 32-byte identity token
// - dm_spam: token -> (count, window_start, actioned)
// - banned_words: normalized terms
// - activation_state: single row, present once activated
// - rotation_state: single row, time of the last key rotation
//
// Timestamps are unix milliseconds. Counter updates are one upsert statement
// each, so the window check and the increment can't interleave with another
// writer for the same token.

use crate::core::moderation::{
    ActivationState, CounterTotals, DmSpamRecord, IdentityToken, ModerationError,
    ModerationStore, ViolationRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

fn storage_err(e: sqlx::Error) -> ModerationError {
    ModerationError::Storage(e.to_string())
}

fn to_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, ModerationError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ModerationError::Storage(format!("invalid timestamp {}", ms)))
}

fn to_count(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl SqliteModerationStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let in_memory = database_url.contains(":memory:");

        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !in_memory && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        // Every connection to :memory: is its own database, so keep exactly one alive.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };
        let pool = options.connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS violations (
                token BLOB PRIMARY KEY,
                count INTEGER NOT NULL,
                window_start INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dm_spam (
                token BLOB PRIMARY KEY,
                count INTEGER NOT NULL,
                window_start INTEGER NOT NULL,
                actioned INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS banned_words (
                term TEXT PRIMARY KEY
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activation_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                activated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rotation_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_rotated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn record_violation(
        &self,
        token: &IdentityToken,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<ViolationRecord, ModerationError> {
        let row = sqlx::query(
            r#"
            INSERT INTO violations (token, count, window_start)
            VALUES (?1, 1, ?2)
            ON CONFLICT(token) DO UPDATE SET
                count = CASE WHEN ?2 - violations.window_start > ?3
                             THEN 1 ELSE violations.count + 1 END,
                window_start = CASE WHEN ?2 - violations.window_start > ?3
                                    THEN ?2 ELSE violations.window_start END
            RETURNING count, window_start
            "#,
        )
        .bind(token.as_bytes().to_vec())
        .bind(now.timestamp_millis())
        .bind(to_millis(window))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(ViolationRecord {
            count: to_count(row.get("count")),
            window_start: from_millis(row.get("window_start"))?,
        })
    }

    async fn record_dm(
        &self,
        token: &IdentityToken,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<DmSpamRecord, ModerationError> {
        let row = sqlx::query(
            r#"
            INSERT INTO dm_spam (token, count, window_start, actioned)
            VALUES (?1, 1, ?2, 0)
            ON CONFLICT(token) DO UPDATE SET
                count = CASE WHEN ?2 - dm_spam.window_start > ?3
                             THEN 1 ELSE dm_spam.count + 1 END,
                actioned = CASE WHEN ?2 - dm_spam.window_start > ?3
                                THEN 0 ELSE dm_spam.actioned END,
                window_start = CASE WHEN ?2 - dm_spam.window_start > ?3
                                    THEN ?2 ELSE dm_spam.window_start END
            RETURNING count, window_start, actioned
            "#,
        )
        .bind(token.as_bytes().to_vec())
        .bind(now.timestamp_millis())
        .bind(to_millis(window))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(DmSpamRecord {
            count: to_count(row.get("count")),
            window_start: from_millis(row.get("window_start"))?,
            actioned: row.get::<i64, _>("actioned") != 0,
        })
    }

    async fn mark_dm_actioned(&self, token: &IdentityToken) -> Result<(), ModerationError> {
        sqlx::query("UPDATE dm_spam SET actioned = 1 WHERE token = ?")
            .bind(token.as_bytes().to_vec())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn clear_counters(&self, rotated_at: DateTime<Utc>) -> Result<u64, ModerationError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let violations = sqlx::query("DELETE FROM violations")
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        let dm_spam = sqlx::query("DELETE FROM dm_spam")
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO rotation_state (id, last_rotated_at) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET last_rotated_at = excluded.last_rotated_at
            "#,
        )
        .bind(rotated_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(violations + dm_spam)
    }

    async fn prune_expired(
        &self,
        now: DateTime<Utc>,
        violation_window: Duration,
        dm_window: Duration,
    ) -> Result<u64, ModerationError> {
        let now_ms = now.timestamp_millis();

        let violations = sqlx::query("DELETE FROM violations WHERE ? - window_start > ?")
            .bind(now_ms)
            .bind(to_millis(violation_window))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?
            .rows_affected();
        let dm_spam = sqlx::query("DELETE FROM dm_spam WHERE ? - window_start > ?")
            .bind(now_ms)
            .bind(to_millis(dm_window))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?
            .rows_affected();

        Ok(violations + dm_spam)
    }

    async fn counter_totals(
        &self,
        now: DateTime<Utc>,
        violation_window: Duration,
        dm_window: Duration,
    ) -> Result<CounterTotals, ModerationError> {
        let now_ms = now.timestamp_millis();

        let violations = sqlx::query(
            "SELECT COALESCE(SUM(count), 0) AS total FROM violations WHERE ? - window_start <= ?",
        )
        .bind(now_ms)
        .bind(to_millis(violation_window))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        let dm = sqlx::query(
            r#"
            SELECT COALESCE(SUM(count), 0) AS total, COALESCE(SUM(actioned), 0) AS actioned
            FROM dm_spam WHERE ? - window_start <= ?
            "#,
        )
        .bind(now_ms)
        .bind(to_millis(dm_window))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(CounterTotals {
            violations_in_window: violations.get::<i64, _>("total").max(0) as u64,
            dm_messages_in_window: dm.get::<i64, _>("total").max(0) as u64,
            dm_actioned: dm.get::<i64, _>("actioned").max(0) as u64,
        })
    }

    async fn last_rotated_at(&self) -> Result<Option<DateTime<Utc>>, ModerationError> {
        let row = sqlx::query("SELECT last_rotated_at FROM rotation_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| from_millis(r.get("last_rotated_at")))
            .transpose()
    }

    async fn add_banned_words(
        &self,
        terms: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ModerationError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut added = BTreeSet::new();

        for term in terms {
            let inserted = sqlx::query("INSERT OR IGNORE INTO banned_words (term) VALUES (?)")
                .bind(term)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
                .rows_affected();
            if inserted > 0 {
                added.insert(term.clone());
            }
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(added)
    }

    async fn remove_banned_words(
        &self,
        terms: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ModerationError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut removed = BTreeSet::new();

        for term in terms {
            let deleted = sqlx::query("DELETE FROM banned_words WHERE term = ?")
                .bind(term)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
                .rows_affected();
            if deleted > 0 {
                removed.insert(term.clone());
            }
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(removed)
    }

    async fn banned_words(&self) -> Result<Vec<String>, ModerationError> {
        let rows = sqlx::query("SELECT term FROM banned_words ORDER BY term")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(rows.iter().map(|r| r.get::<String, _>("term")).collect())
    }

    async fn activation_state(&self) -> Result<ActivationState, ModerationError> {
        let row = sqlx::query("SELECT activated_at FROM activation_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(ActivationState {
            activated_at: row
                .map(|r| from_millis(r.get("activated_at")))
                .transpose()?,
        })
    }

    async fn activate(&self, now: DateTime<Utc>) -> Result<bool, ModerationError> {
        let inserted = sqlx::query(
            "INSERT INTO activation_state (id, activated_at) VALUES (1, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?
        .rows_affected();

        Ok(inserted > 0)
    }
}
