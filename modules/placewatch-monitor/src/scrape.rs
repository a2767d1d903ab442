//! One-shot extraction surfaces: bulk review scrape and place metadata.
//!
//! Unlike the monitoring loop, a bulk scrape tolerates a missing sort menu
//! (it falls back to the page's default ordering) because it has no
//! incremental early-stop to keep sound.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use chrome_session::SessionError;
use placewatch_common::{PlaceInfo, ReviewRecord, SortOrder};

use crate::extractor::PlaceExtractor;
use crate::pipeline::{ExtractionRun, RunLimits, DEFAULT_PASS_DELAY};
use crate::store::ReviewStore;
use crate::traits::{DriverFactory, PageDriver};

#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub url: String,
    pub max_reviews: usize,
    pub sort_order: SortOrder,
    /// Drop reviews older than this once reached (requires a date-ordered
    /// sort to be meaningful).
    pub min_review_date: Option<DateTime<Utc>>,
    pub max_scrolls: u32,
    /// Settle wait between a scroll and the following parse.
    pub pass_delay: Duration,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reviews: 100,
            sort_order: SortOrder::Newest,
            min_review_date: None,
            max_scrolls: 40,
            pass_delay: DEFAULT_PASS_DELAY,
        }
    }
}

/// Scrape up to `max_reviews` reviews from a place page.
pub async fn scrape_reviews<F: DriverFactory>(
    factory: &F,
    request: &ScrapeRequest,
) -> Result<Vec<ReviewRecord>> {
    let mut driver = factory.launch().await.context("Launching browser session failed")?;
    let outcome = scrape_with_driver(&mut driver, request).await;
    driver.close().await;
    outcome
}

async fn scrape_with_driver<D: PageDriver>(
    driver: &mut D,
    request: &ScrapeRequest,
) -> Result<Vec<ReviewRecord>> {
    driver
        .open(&request.url)
        .await
        .with_context(|| format!("Opening {} failed", request.url))?;

    match driver.select_sort(request.sort_order).await {
        Ok(()) => {}
        Err(SessionError::SortMenuNotFound { attempts }) => {
            warn!(attempts, "Sort menu not found, scraping in default order");
        }
        Err(e) => return Err(e).context("Selecting sort order failed"),
    }

    let limits = RunLimits::for_target(request.max_reviews, request.max_scrolls, request.pass_delay);
    let mut run = ExtractionRun::new(driver, limits);
    let mut collected = Vec::new();

    'scrape: while let Some(batch) = run.next_batch().await? {
        for record in batch {
            if let Some(cutoff) = request.min_review_date {
                if record.review_date < cutoff {
                    info!("Reached review date cutoff");
                    break 'scrape;
                }
            }
            collected.push(record);
            if collected.len() >= request.max_reviews {
                break 'scrape;
            }
        }
    }

    info!(url = %request.url, reviews = collected.len(), "Scrape complete");
    Ok(collected)
}

/// Persist scraped records, skipping ids already stored. Returns how many
/// were newly inserted.
pub async fn persist_reviews<S: ReviewStore + ?Sized>(
    store: &S,
    records: &[ReviewRecord],
) -> Result<usize> {
    let mut inserted = 0;
    for record in records {
        if store.insert(record).await? {
            inserted += 1;
        }
    }
    info!(total = records.len(), inserted, "Scraped reviews persisted");
    Ok(inserted)
}

/// Extract place-level metadata (name, rating, address, hours) from a place
/// page without touching the review list.
pub async fn scrape_place_info<F: DriverFactory>(factory: &F, url: &str) -> Result<PlaceInfo> {
    let mut driver = factory.launch().await.context("Launching browser session failed")?;

    let outcome = async {
        driver
            .open(url)
            .await
            .with_context(|| format!("Opening {url} failed"))?;
        driver.html().await.context("Reading page content failed")
    }
    .await;
    driver.close().await;

    let html = outcome?;
    let info = PlaceExtractor::new().parse_place(&html, url);
    info!(url, name = ?info.name, "Place info extracted");
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{review_card, MockDriver, MockFactory};

    fn page(ids: &[&str]) -> String {
        ids.iter()
            .map(|id| review_card(id, Some("Reviewer"), Some(3), None, Some("a week ago")))
            .collect()
    }

    #[tokio::test]
    async fn scrape_caps_at_max_reviews() {
        let driver = MockDriver::with_snapshots(vec![
            page(&["a", "b", "c"]),
            page(&["a", "b", "c", "d", "e"]),
        ]);
        let factory = MockFactory::new(vec![driver]);

        let mut request = ScrapeRequest::new("https://maps.example.com/place/x");
        request.max_reviews = 4;
        request.pass_delay = Duration::ZERO;
        let reviews = scrape_reviews(&factory, &request).await.unwrap();

        assert_eq!(reviews.len(), 4);
        let ids: Vec<&str> = reviews.iter().map(|r| r.id_review.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn scrape_survives_missing_sort_menu() {
        let driver = MockDriver::failing_sort(vec![page(&["a", "b"])]);
        let factory = MockFactory::new(vec![driver]);

        let mut request = ScrapeRequest::new("https://maps.example.com/place/x");
        request.pass_delay = Duration::ZERO;
        let reviews = scrape_reviews(&factory, &request).await.unwrap();
        assert_eq!(reviews.len(), 2);
    }

    #[tokio::test]
    async fn scrape_fails_when_page_does_not_open() {
        let factory = MockFactory::new(vec![MockDriver::failing_open()]);
        let request = ScrapeRequest::new("https://maps.example.com/place/x");
        assert!(scrape_reviews(&factory, &request).await.is_err());
    }

    #[tokio::test]
    async fn persist_skips_already_stored_ids() {
        use crate::store::MemoryStore;

        let driver = MockDriver::with_snapshots(vec![page(&["a", "b", "c"])]);
        let factory = MockFactory::new(vec![driver]);
        let mut request = ScrapeRequest::new("https://maps.example.com/place/x");
        request.pass_delay = Duration::ZERO;
        let reviews = scrape_reviews(&factory, &request).await.unwrap();

        let store = MemoryStore::new();
        store
            .insert(&reviews[0])
            .await
            .unwrap();

        let inserted = persist_reviews(&store, &reviews).await.unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn place_info_parses_header_fields() {
        let html = r#"
            <h1 class="DUwDvf fontHeadlineLarge">Cactus Cafe</h1>
            <div class="F7nice"><span class="ceNzKf" aria-label="4,4 stars"></span>
            <span>(1.234)</span></div>
        "#;
        let driver = MockDriver::with_snapshots(vec![html.to_string()]);
        let factory = MockFactory::new(vec![driver]);

        let info = scrape_place_info(&factory, "https://maps.example.com/place/x")
            .await
            .unwrap();
        assert_eq!(info.name.as_deref(), Some("Cactus Cafe"));
        assert_eq!(info.url, "https://maps.example.com/place/x");
    }
}
