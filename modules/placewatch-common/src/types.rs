use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One extracted review. Field names are the wire names: the struct
/// serializes directly into the webhook payload and the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewRecord {
    /// Source-assigned review identifier. Primary dedup key.
    pub id_review: String,
    /// Review text. Reviews may carry none.
    pub caption: Option<String>,
    /// Raw human-readable age string ("3 weeks ago"). Language depends on
    /// the locale the source served the page in.
    pub relative_date: Option<String>,
    /// `retrieval_date` minus the parsed relative duration. Never later
    /// than `retrieval_date`; equal when the relative string is unparseable.
    pub review_date: DateTime<Utc>,
    /// Captured at parse time, immutable once set.
    pub retrieval_date: DateTime<Utc>,
    pub rating: Option<f64>,
    pub username: Option<String>,
    pub n_review_user: Option<u32>,
    pub n_photo_user: Option<u32>,
    pub url_user: Option<String>,

    // Foreign linkage. Set by the monitor, not the extractor.
    #[serde(default)]
    pub place_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub branch_id: Option<String>,

    // Set exactly once, by the notification dispatcher on confirmed delivery.
    #[serde(default)]
    pub notified_via_webhook: bool,
    #[serde(default)]
    pub webhook_sent_at: Option<DateTime<Utc>>,
}

impl ReviewRecord {
    /// A record before the monitor has attached place linkage.
    pub fn new(id_review: String, retrieval_date: DateTime<Utc>) -> Self {
        Self {
            id_review,
            caption: None,
            relative_date: None,
            review_date: retrieval_date,
            retrieval_date,
            rating: None,
            username: None,
            n_review_user: None,
            n_photo_user: None,
            url_user: None,
            place_id: None,
            client_id: None,
            branch_id: None,
            notified_via_webhook: false,
            webhook_sent_at: None,
        }
    }
}

/// A registered place. Owned by the external registry; the monitor reads it
/// and writes back only `last_check` and `last_review_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub place_id: String,
    pub client_id: String,
    pub branch_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    pub webhook_url: String,
    #[serde(default = "default_true")]
    pub monitoring_enabled: bool,
    #[serde(default = "default_interval")]
    pub check_interval_minutes: u32,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_review_count: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u32 {
    60
}

/// Place-page header data. Every field independently optional except the URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaceInfo {
    pub name: Option<String>,
    pub overall_rating: Option<f64>,
    pub n_reviews: Option<u64>,
    pub n_photos: Option<u64>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub phone_number: Option<String>,
    pub plus_code: Option<String>,
    pub opening_hours: Option<String>,
    pub url: String,
}

/// Review sort order, as positions in the sort-options menu.
///
/// Canonical mapping checked against the live menu ordering. Monitoring must
/// always use `Newest`: the early-stop rule (first already-known review ends
/// the scan) is only correct newest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    MostRelevant,
    Newest,
    HighestRating,
    LowestRating,
}

impl SortOrder {
    /// Zero-based index of this option in the sort menu.
    pub fn menu_index(self) -> usize {
        match self {
            SortOrder::MostRelevant => 0,
            SortOrder::Newest => 1,
            SortOrder::HighestRating => 2,
            SortOrder::LowestRating => 3,
        }
    }
}

/// Webhook payload posted as JSON on new reviews (and for test deliveries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub client_id: String,
    pub branch_id: String,
    pub place_id: String,
    pub place_name: Option<String>,
    pub place_url: String,
    pub new_reviews_count: usize,
    pub reviews: Vec<ReviewRecord>,
    pub timestamp: DateTime<Utc>,
}

/// Result of probing a candidate webhook URL with a synthetic payload.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookTestReport {
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    /// Response body truncated to 500 bytes, when one was received.
    pub response_body: Option<String>,
    pub error: Option<String>,
}

/// Outcome of checking one place during a monitoring cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceCheckResult {
    pub place_id: String,
    pub client_id: String,
    pub branch_id: String,
    pub status: CheckStatus,
    pub new_reviews_count: usize,
    pub webhook_sent: bool,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Success,
    Failed,
}

/// Structured summary of one monitoring cycle. Always produced, even when
/// individual places failed; the cycle never raises past its own boundary.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub total_places: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_new_reviews: usize,
    pub checked_at: DateTime<Utc>,
    pub results: Vec<PlaceCheckResult>,
}

impl CycleSummary {
    pub fn empty(checked_at: DateTime<Utc>) -> Self {
        Self {
            total_places: 0,
            successful: 0,
            failed: 0,
            total_new_reviews: 0,
            checked_at,
            results: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_record_wire_shape() {
        let now = Utc::now();
        let mut r = ReviewRecord::new("ChZDSUhN".to_string(), now);
        r.rating = Some(4.0);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["id_review"], "ChZDSUhN");
        assert_eq!(value["rating"], 4.0);
        assert!(value["caption"].is_null());
        assert_eq!(value["notified_via_webhook"], false);
        // Timestamps serialize as ISO-8601 strings
        assert!(value["retrieval_date"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn sort_order_menu_indices() {
        assert_eq!(SortOrder::MostRelevant.menu_index(), 0);
        assert_eq!(SortOrder::Newest.menu_index(), 1);
        assert_eq!(SortOrder::HighestRating.menu_index(), 2);
        assert_eq!(SortOrder::LowestRating.menu_index(), 3);
    }

    #[test]
    fn place_defaults() {
        let place: Place = serde_json::from_str(
            r#"{
                "place_id": "p1", "client_id": "c1", "branch_id": "b1",
                "url": "https://maps.example.com/place/p1",
                "webhook_url": "https://hooks.example.com/r"
            }"#,
        )
        .unwrap();
        assert!(place.monitoring_enabled);
        assert_eq!(place.check_interval_minutes, 60);
        assert_eq!(place.last_review_count, 0);
        assert!(place.last_check.is_none());
    }
}
