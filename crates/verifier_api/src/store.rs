//! Persistent storage
//!
//! Two logical tables on separate SQLite pools: `emails` tracks every
//! address the service has been asked about, `verification_results`
//! holds one serialized verdict per address. Schema is created here at
//! startup; the core never sees SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;
use verifier_core::cache::{CachedVerdict, VerdictStore};

/// Open (and create if missing) a SQLite database
pub async fn connect(url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// `verification_results(address UNIQUE, json, cached_at)`
pub struct SqliteVerdictStore {
    pool: SqlitePool,
}

impl SqliteVerdictStore {
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS verification_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                json TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        info!("Verdict store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl VerdictStore for SqliteVerdictStore {
    async fn find(&self, address: &str) -> anyhow::Result<Option<CachedVerdict>> {
        let row = sqlx::query(
            "SELECT address, json, cached_at FROM verification_results WHERE address = ?",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CachedVerdict {
            address: row.get("address"),
            json: row.get("json"),
            cached_at: row.get("cached_at"),
        }))
    }

    async fn upsert(
        &self,
        address: &str,
        json: &str,
        cached_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO verification_results (address, json, cached_at) VALUES (?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET json = excluded.json, cached_at = excluded.cached_at",
        )
        .bind(address)
        .bind(json)
        .bind(cached_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn expired_before(&self, threshold: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT address FROM verification_results WHERE cached_at < ?")
            .bind(threshold)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("address")).collect())
    }

    async fn all(&self) -> anyhow::Result<Vec<CachedVerdict>> {
        let rows = sqlx::query("SELECT address, json, cached_at FROM verification_results")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| CachedVerdict {
                address: row.get("address"),
                json: row.get("json"),
                cached_at: row.get("cached_at"),
            })
            .collect())
    }
}

/// `emails(address UNIQUE, processed, validated_at)` - the primary
/// table of tracked addresses
#[derive(Clone)]
pub struct EmailRegistry {
    pool: SqlitePool,
}

impl EmailRegistry {
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                processed INTEGER NOT NULL DEFAULT 0,
                validated_at TEXT
            )",
        )
        .execute(&pool)
        .await?;
        info!("Email registry ready");
        Ok(Self { pool })
    }

    /// Insert the address unless it is already tracked
    pub async fn ensure_registered(&self, address: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT OR IGNORE INTO emails (address) VALUES (?)")
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Addresses that have never been validated
    pub async fn unprocessed(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT address FROM emails WHERE processed = 0")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("address")).collect())
    }

    pub async fn mark_processed(&self, address: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE emails SET processed = 1, validated_at = ? WHERE address = ?")
            .bind(Utc::now())
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every tracked address
    pub async fn all_addresses(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT address FROM emails ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("address")).collect())
    }

    /// Cheap connectivity check for the readiness probe
    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
