//! At-least-once webhook delivery for newly discovered reviews.
//!
//! Any 2xx response counts as delivered; anything else (non-2xx, timeout,
//! transport error) is a failed attempt subject to the retry budget. Only a
//! fully delivered batch gets its records marked notified, in one bulk
//! update; a failed delivery marks nothing (no partial credit).

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use placewatch_common::{Place, ReviewRecord, WebhookPayload, WebhookTestReport};

use crate::store::ReviewStore;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub timeout: Duration,
    /// Retries after the first attempt; default 3 means up to 4 attempts.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct NotificationDispatcher {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl NotificationDispatcher {
    pub fn new(config: WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self { client, config }
    }

    /// Notify a place's webhook about a batch of new reviews and, on
    /// confirmed delivery, mark the batch notified. Returns whether
    /// delivery succeeded. An empty batch is vacuous success.
    pub async fn notify<S: ReviewStore + ?Sized>(
        &self,
        store: &S,
        place: &Place,
        batch: &[ReviewRecord],
    ) -> Result<bool> {
        if batch.is_empty() {
            debug!(place_id = %place.place_id, "Empty batch, skipping webhook");
            return Ok(true);
        }

        let payload = WebhookPayload {
            event: "new_reviews".to_string(),
            client_id: place.client_id.clone(),
            branch_id: place.branch_id.clone(),
            place_id: place.place_id.clone(),
            place_name: place.name.clone(),
            place_url: place.url.clone(),
            new_reviews_count: batch.len(),
            reviews: batch.to_vec(),
            timestamp: Utc::now(),
        };

        let delivered = self.deliver(&place.webhook_url, &payload).await;

        if delivered {
            let ids: Vec<String> = batch.iter().map(|r| r.id_review.clone()).collect();
            let marked = store.bulk_mark_notified(&ids, Utc::now()).await?;
            info!(
                place_id = %place.place_id,
                delivered = batch.len(),
                marked,
                "Webhook delivered, batch marked notified"
            );
        }

        Ok(delivered)
    }

    async fn deliver(&self, url: &str, payload: &WebhookPayload) -> bool {
        let attempts = self.config.max_retries + 1;
        for attempt in 1..=attempts {
            match self.client.post(url).json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(url, status = response.status().as_u16(), "Webhook sent");
                    return true;
                }
                Ok(response) => {
                    warn!(
                        url,
                        status = response.status().as_u16(),
                        attempt,
                        attempts,
                        "Webhook returned non-success status"
                    );
                }
                Err(e) => {
                    warn!(url, attempt, attempts, error = %e, "Webhook request failed");
                }
            }
            if attempt < attempts {
                sleep(self.config.retry_delay).await;
            }
        }
        error!(url, attempts, "Webhook delivery exhausted retries");
        false
    }

    /// Probe a candidate webhook URL with a minimal synthetic payload.
    /// Used by the operator-facing surface, never by the monitoring loop.
    pub async fn test(&self, url: &str) -> WebhookTestReport {
        let payload = WebhookPayload {
            event: "test".to_string(),
            client_id: "test_client".to_string(),
            branch_id: "test_branch".to_string(),
            place_id: "test_place".to_string(),
            place_name: Some("Test Place".to_string()),
            place_url: "https://maps.example.com/place/test".to_string(),
            new_reviews_count: 0,
            reviews: Vec::new(),
            timestamp: Utc::now(),
        };

        let started = Instant::now();
        match self.client.post(url).json(&payload).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let elapsed = started.elapsed().as_millis() as u64;
                let body = response.text().await.unwrap_or_default();
                let truncated = if body.is_empty() {
                    None
                } else {
                    Some(truncate_to_bytes(&body, 500).to_string())
                };
                WebhookTestReport {
                    success: (200..300).contains(&status),
                    status_code: Some(status),
                    response_time_ms: Some(elapsed),
                    response_body: truncated,
                    error: None,
                }
            }
            Err(e) => WebhookTestReport {
                success: false,
                status_code: None,
                response_time_ms: Some(started.elapsed().as_millis() as u64),
                response_body: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Cut `body` at `max` bytes, backing off to the nearest character boundary
/// so the result stays valid UTF-8.
fn truncate_to_bytes(body: &str, max: usize) -> &str {
    if body.len() <= max {
        return body;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use crate::store::MemoryStore;

    async fn spawn_server(status: StatusCode) -> (SocketAddr, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let state = hits.clone();
        let app = Router::new().route(
            "/hook",
            post(
                move |State(hits): State<Arc<AtomicU32>>, Json(_body): Json<serde_json::Value>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                },
            ),
        )
        .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    fn fast_dispatcher() -> NotificationDispatcher {
        NotificationDispatcher::new(WebhookConfig {
            timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
        })
    }

    fn place(webhook_url: String) -> Place {
        Place {
            place_id: "p1".to_string(),
            client_id: "c1".to_string(),
            branch_id: "b1".to_string(),
            name: Some("Cafe".to_string()),
            url: "https://maps.example.com/place/p1".to_string(),
            webhook_url,
            monitoring_enabled: true,
            check_interval_minutes: 60,
            last_check: None,
            last_review_count: 0,
        }
    }

    async fn batch(store: &MemoryStore, ids: &[&str]) -> Vec<ReviewRecord> {
        let mut records = Vec::new();
        for id in ids {
            let mut r = ReviewRecord::new(id.to_string(), Utc::now());
            r.place_id = Some("p1".to_string());
            store.insert(&r).await.unwrap();
            records.push(r);
        }
        records
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_delivery_marks_whole_batch() {
        let (addr, hits) = spawn_server(StatusCode::OK).await;
        let store = MemoryStore::new();
        let records = batch(&store, &["a", "b"]).await;
        let place = place(format!("http://{addr}/hook"));

        let sent = fast_dispatcher()
            .notify(&store, &place, &records)
            .await
            .unwrap();
        assert!(sent);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(store.get("a").unwrap().notified_via_webhook);
        assert!(store.get("b").unwrap().notified_via_webhook);
        assert!(store.get("a").unwrap().webhook_sent_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_delivery_retries_and_marks_nothing() {
        let (addr, hits) = spawn_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let store = MemoryStore::new();
        let records = batch(&store, &["a", "b"]).await;
        let place = place(format!("http://{addr}/hook"));

        let sent = fast_dispatcher()
            .notify(&store, &place, &records)
            .await
            .unwrap();
        assert!(!sent);
        // max_retries = 2 → 3 attempts total
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!store.get("a").unwrap().notified_via_webhook);
        assert!(!store.get("b").unwrap().notified_via_webhook);
        assert!(store.get("a").unwrap().webhook_sent_at.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_batch_is_vacuous_success() {
        let (addr, hits) = spawn_server(StatusCode::OK).await;
        let store = MemoryStore::new();
        let place = place(format!("http://{addr}/hook"));

        let sent = fast_dispatcher().notify(&store, &place, &[]).await.unwrap();
        assert!(sent);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_probe_reports_status_and_latency() {
        let (addr, _hits) = spawn_server(StatusCode::NO_CONTENT).await;
        let report = fast_dispatcher().test(&format!("http://{addr}/hook")).await;
        assert!(report.success);
        assert_eq!(report.status_code, Some(204));
        assert!(report.response_time_ms.is_some());
        assert!(report.error.is_none());
    }

    #[test]
    fn body_truncation_is_bytes_on_a_char_boundary() {
        // 200 three-byte chars = 600 bytes; 500 falls mid-character, so the
        // cut backs off to 498
        let body = "€".repeat(200);
        let cut = truncate_to_bytes(&body, 500);
        assert_eq!(cut.len(), 498);
        assert_eq!(cut.chars().count(), 166);

        let short = "ok";
        assert_eq!(truncate_to_bytes(short, 500), "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_probe_reports_transport_error() {
        // Nothing listens on this port.
        let report = fast_dispatcher().test("http://127.0.0.1:1/hook").await;
        assert!(!report.success);
        assert!(report.status_code.is_none());
        assert!(report.error.is_some());
    }
}
