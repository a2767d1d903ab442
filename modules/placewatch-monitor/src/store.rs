//! The persistent review store, consumed as a key-value/set lookup.
//!
//! Cross-run dedup correctness hangs off these four operations, so store
//! failures are surfaced to the caller, never swallowed. `insert` is
//! insert-if-absent at the database level (`ON CONFLICT DO NOTHING`), which
//! also closes the check-then-insert race if scans are ever parallelized.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use placewatch_common::ReviewRecord;

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Whether this review id has been persisted by any previous run.
    async fn exists(&self, id_review: &str) -> Result<bool>;

    /// Insert-if-absent. Returns whether the record was newly stored;
    /// re-inserting an existing id is a no-op, never an error.
    async fn insert(&self, record: &ReviewRecord) -> Result<bool>;

    /// Mark a batch as delivered, one bulk update keyed by the id set.
    /// The only mutation path for the notified fields.
    async fn bulk_mark_notified(&self, ids: &[String], at: DateTime<Utc>) -> Result<u64>;

    /// Persist the monitoring checkpoint for a place.
    async fn update_place_checkpoint(
        &self,
        place_id: &str,
        checked_at: DateTime<Utc>,
        review_count: u64,
    ) -> Result<()>;

    /// Total persisted reviews for a place; feeds `last_review_count`.
    async fn count_for_place(&self, place_id: &str) -> Result<u64>;
}

// --- Postgres-backed store ---

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Postgres connection failed")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reviews (
                id_review TEXT PRIMARY KEY,
                place_id TEXT,
                review_date TIMESTAMPTZ NOT NULL,
                retrieval_date TIMESTAMPTZ NOT NULL,
                notified_via_webhook BOOLEAN NOT NULL DEFAULT FALSE,
                webhook_sent_at TIMESTAMPTZ,
                payload JSONB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS reviews_place_idx ON reviews (place_id)")
            .execute(&self.pool)
            .await?;
        // Checkpoints live in their own table: the place registry itself is
        // owned by an external service.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS place_checkpoints (
                place_id TEXT PRIMARY KEY,
                last_check TIMESTAMPTZ NOT NULL,
                last_review_count BIGINT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        info!("Review store migrations applied");
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for PgStore {
    async fn exists(&self, id_review: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM reviews WHERE id_review = $1")
            .bind(id_review)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, record: &ReviewRecord) -> Result<bool> {
        let payload = serde_json::to_value(record).context("Review serialization failed")?;
        let result = sqlx::query(
            "INSERT INTO reviews
                (id_review, place_id, review_date, retrieval_date,
                 notified_via_webhook, webhook_sent_at, payload)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id_review) DO NOTHING",
        )
        .bind(&record.id_review)
        .bind(&record.place_id)
        .bind(record.review_date)
        .bind(record.retrieval_date)
        .bind(record.notified_via_webhook)
        .bind(record.webhook_sent_at)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn bulk_mark_notified(&self, ids: &[String], at: DateTime<Utc>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE reviews
             SET notified_via_webhook = TRUE,
                 webhook_sent_at = $2,
                 payload = payload || jsonb_build_object(
                     'notified_via_webhook', TRUE,
                     'webhook_sent_at', to_jsonb($2::timestamptz))
             WHERE id_review = ANY($1)",
        )
        .bind(ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        debug!(marked = result.rows_affected(), "Reviews marked notified");
        Ok(result.rows_affected())
    }

    async fn update_place_checkpoint(
        &self,
        place_id: &str,
        checked_at: DateTime<Utc>,
        review_count: u64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO place_checkpoints (place_id, last_check, last_review_count)
             VALUES ($1, $2, $3)
             ON CONFLICT (place_id)
             DO UPDATE SET last_check = EXCLUDED.last_check,
                           last_review_count = EXCLUDED.last_review_count",
        )
        .bind(place_id)
        .bind(checked_at)
        .bind(review_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_for_place(&self, place_id: &str) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM reviews WHERE place_id = $1")
            .bind(place_id)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count as u64)
    }
}

// --- In-memory store (tests, dry runs) ---

#[derive(Default)]
struct MemoryInner {
    reviews: HashMap<String, ReviewRecord>,
    checkpoints: HashMap<String, (DateTime<Utc>, u64)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id_review: &str) -> Option<ReviewRecord> {
        self.inner.lock().unwrap().reviews.get(id_review).cloned()
    }

    pub fn checkpoint(&self, place_id: &str) -> Option<(DateTime<Utc>, u64)> {
        self.inner.lock().unwrap().checkpoints.get(place_id).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().reviews.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn exists(&self, id_review: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().reviews.contains_key(id_review))
    }

    async fn insert(&self, record: &ReviewRecord) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.reviews.contains_key(&record.id_review) {
            return Ok(false);
        }
        inner.reviews.insert(record.id_review.clone(), record.clone());
        Ok(true)
    }

    async fn bulk_mark_notified(&self, ids: &[String], at: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut marked = 0;
        for id in ids {
            if let Some(record) = inner.reviews.get_mut(id) {
                record.notified_via_webhook = true;
                record.webhook_sent_at = Some(at);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn update_place_checkpoint(
        &self,
        place_id: &str,
        checked_at: DateTime<Utc>,
        review_count: u64,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .checkpoints
            .insert(place_id.to_string(), (checked_at, review_count));
        Ok(())
    }

    async fn count_for_place(&self, place_id: &str) -> Result<u64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .reviews
            .values()
            .filter(|r| r.place_id.as_deref() == Some(place_id))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, place: &str) -> ReviewRecord {
        let mut r = ReviewRecord::new(id.to_string(), Utc::now());
        r.place_id = Some(place.to_string());
        r
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let store = MemoryStore::new();
        assert!(store.insert(&record("a", "p1")).await.unwrap());
        assert!(!store.insert(&record("a", "p1")).await.unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.exists("a").await.unwrap());
        assert!(!store.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn bulk_mark_sets_both_fields_once() {
        let store = MemoryStore::new();
        store.insert(&record("a", "p1")).await.unwrap();
        store.insert(&record("b", "p1")).await.unwrap();

        let at = Utc::now();
        let marked = store
            .bulk_mark_notified(&["a".to_string(), "b".to_string(), "ghost".to_string()], at)
            .await
            .unwrap();
        assert_eq!(marked, 2);

        let a = store.get("a").unwrap();
        assert!(a.notified_via_webhook);
        assert_eq!(a.webhook_sent_at, Some(at));
    }

    #[tokio::test]
    async fn count_scoped_to_place() {
        let store = MemoryStore::new();
        store.insert(&record("a", "p1")).await.unwrap();
        store.insert(&record("b", "p1")).await.unwrap();
        store.insert(&record("c", "p2")).await.unwrap();
        assert_eq!(store.count_for_place("p1").await.unwrap(), 2);
        assert_eq!(store.count_for_place("p2").await.unwrap(), 1);
        assert_eq!(store.count_for_place("p3").await.unwrap(), 0);
    }
}
