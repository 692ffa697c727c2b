//! Durable swap and intent storage
//!
//! Any backend with read-your-writes consistency per id satisfies the
//! coordinator; the embedded SQLite store is the default deployment and the
//! in-memory store backs tests.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::error::CoordinatorResult;
use crate::types::{IntentRecord, SwapRecord};

#[async_trait]
pub trait SwapStore: Send + Sync {
    async fn put_swap(&self, record: &SwapRecord) -> CoordinatorResult<()>;
    async fn get_swap(&self, swap_id: Uuid) -> CoordinatorResult<Option<SwapRecord>>;
    /// All swap records not in a terminal phase
    async fn active_swaps(&self) -> CoordinatorResult<Vec<SwapRecord>>;

    async fn put_intent(&self, record: &IntentRecord) -> CoordinatorResult<()>;
    async fn get_intent(&self, intent_id: Uuid) -> CoordinatorResult<Option<IntentRecord>>;
    /// All intents still accepting bids
    async fn open_intents(&self) -> CoordinatorResult<Vec<IntentRecord>>;
}

/// In-memory store for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryStore {
    swaps: DashMap<Uuid, SwapRecord>,
    intents: DashMap<Uuid, IntentRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwapStore for MemoryStore {
    async fn put_swap(&self, record: &SwapRecord) -> CoordinatorResult<()> {
        self.swaps.insert(record.swap_id, record.clone());
        Ok(())
    }

    async fn get_swap(&self, swap_id: Uuid) -> CoordinatorResult<Option<SwapRecord>> {
        Ok(self.swaps.get(&swap_id).map(|r| r.clone()))
    }

    async fn active_swaps(&self) -> CoordinatorResult<Vec<SwapRecord>> {
        Ok(self
            .swaps
            .iter()
            .filter(|r| !r.phase.is_terminal())
            .map(|r| r.clone())
            .collect())
    }

    async fn put_intent(&self, record: &IntentRecord) -> CoordinatorResult<()> {
        self.intents.insert(record.intent.intent_id, record.clone());
        Ok(())
    }

    async fn get_intent(&self, intent_id: Uuid) -> CoordinatorResult<Option<IntentRecord>> {
        Ok(self.intents.get(&intent_id).map(|r| r.clone()))
    }

    async fn open_intents(&self) -> CoordinatorResult<Vec<IntentRecord>> {
        Ok(self
            .intents
            .iter()
            .filter(|r| r.status.accepts_bids())
            .map(|r| r.clone())
            .collect())
    }
}

/// Embedded SQLite store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) the database at `url`,
    /// e.g. `sqlite://hourglass.db`
    pub async fn open(url: &str, max_connections: u32) -> CoordinatorResult<Self> {
        let options = url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                swap_id TEXT PRIMARY KEY,
                phase TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_phase ON swaps (phase)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS intents (
                intent_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> CoordinatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SwapStore for SqliteStore {
    async fn put_swap(&self, record: &SwapRecord) -> CoordinatorResult<()> {
        let json = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO swaps (swap_id, phase, record, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (swap_id)
            DO UPDATE SET phase = excluded.phase,
                          record = excluded.record,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(record.swap_id.to_string())
        .bind(record.phase.label())
        .bind(json)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_swap(&self, swap_id: Uuid) -> CoordinatorResult<Option<SwapRecord>> {
        let row = sqlx::query("SELECT record FROM swaps WHERE swap_id = ?1")
            .bind(swap_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("record");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn active_swaps(&self) -> CoordinatorResult<Vec<SwapRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM swaps
            WHERE phase NOT IN ('completed', 'refunded', 'failed')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("record");
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }

    async fn put_intent(&self, record: &IntentRecord) -> CoordinatorResult<()> {
        let json = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO intents (intent_id, status, record, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (intent_id)
            DO UPDATE SET status = excluded.status,
                          record = excluded.record,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(record.intent.intent_id.to_string())
        .bind(record.status.label())
        .bind(json)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_intent(&self, intent_id: Uuid) -> CoordinatorResult<Option<IntentRecord>> {
        let row = sqlx::query("SELECT record FROM intents WHERE intent_id = ?1")
            .bind(intent_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("record");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn open_intents(&self) -> CoordinatorResult<Vec<IntentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM intents
            WHERE status IN ('open', 'partially_filled')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("record");
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }
}
