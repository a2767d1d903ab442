//! Incremental per-place monitoring: detect reviews not yet persisted,
//! persist them, and notify the place's webhook.
//!
//! Each check owns a freshly launched driver for the duration of the scan
//! and releases it on every exit path, including job timeout. The review
//! list is sorted newest-first before scanning, which lets a check stop at
//! the first already-persisted review instead of walking the full history.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use placewatch_common::{
    CheckStatus, CycleSummary, Place, PlaceCheckResult, ReviewRecord, SortOrder,
};

use crate::pipeline::{ExtractionRun, RunLimits, DEFAULT_PASS_DELAY};
use crate::store::ReviewStore;
use crate::traits::{DriverFactory, PageDriver};
use crate::webhook::NotificationDispatcher;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Upper bound on new reviews collected per check.
    pub max_new_per_check: usize,
    /// Scroll budget cap handed to `RunLimits::for_target`.
    pub max_scrolls: u32,
    /// Wall-clock bound on one place scan, browser time included.
    pub job_timeout: Duration,
    /// Settle wait between a scroll and the following parse. Tests use a
    /// near-zero delay; production keeps [`DEFAULT_PASS_DELAY`].
    pub pass_delay: Duration,
    /// Ignore reviews older than this; `None` means no cutoff.
    pub min_review_date: Option<DateTime<Utc>>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_new_per_check: 100,
            max_scrolls: 40,
            job_timeout: Duration::from_secs(600),
            pass_delay: DEFAULT_PASS_DELAY,
            min_review_date: None,
        }
    }
}

pub struct IncrementalMonitor<F, S> {
    factory: F,
    store: S,
    dispatcher: NotificationDispatcher,
    settings: MonitorSettings,
}

impl<F, S> IncrementalMonitor<F, S>
where
    F: DriverFactory,
    S: ReviewStore,
{
    pub fn new(factory: F, store: S, dispatcher: NotificationDispatcher, settings: MonitorSettings) -> Self {
        Self {
            factory,
            store,
            dispatcher,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Check every monitoring-enabled place once, sequentially. A failing
    /// place never aborts the cycle; its failure lands in the summary.
    pub async fn run_cycle(&self, places: &[Place]) -> CycleSummary {
        let enabled: Vec<&Place> = places.iter().filter(|p| p.monitoring_enabled).collect();
        info!(
            total = places.len(),
            enabled = enabled.len(),
            "Starting monitoring cycle"
        );

        let mut summary = CycleSummary::empty(Utc::now());
        summary.total_places = enabled.len();

        for place in enabled {
            let result = self.check_place(place).await;
            match result.status {
                CheckStatus::Success => {
                    summary.successful += 1;
                    summary.total_new_reviews += result.new_reviews_count;
                }
                CheckStatus::Failed => summary.failed += 1,
            }
            summary.results.push(result);
        }

        info!(
            successful = summary.successful,
            failed = summary.failed,
            new_reviews = summary.total_new_reviews,
            "Monitoring cycle complete"
        );
        summary
    }

    /// One place: scan for unseen reviews, persist them, advance the
    /// checkpoint, notify the webhook. Never propagates an error; the
    /// outcome is the returned result.
    pub async fn check_place(&self, place: &Place) -> PlaceCheckResult {
        let checked_at = Utc::now();
        info!(place_id = %place.place_id, client_id = %place.client_id, "Checking place");

        let batch = match self.scan_place(place).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(place_id = %place.place_id, error = %e, "Place check failed");
                return PlaceCheckResult {
                    place_id: place.place_id.clone(),
                    client_id: place.client_id.clone(),
                    branch_id: place.branch_id.clone(),
                    status: CheckStatus::Failed,
                    new_reviews_count: 0,
                    webhook_sent: false,
                    error: Some(e.to_string()),
                    checked_at,
                };
            }
        };

        let mut persisted = Vec::with_capacity(batch.len());
        let mut persist_error = None;
        for mut record in batch {
            record.place_id = Some(place.place_id.clone());
            record.client_id = Some(place.client_id.clone());
            record.branch_id = Some(place.branch_id.clone());
            match self.store.insert(&record).await {
                // A concurrent writer may have landed the same id first;
                // that copy is simply not ours to notify about.
                Ok(true) => persisted.push(record),
                Ok(false) => {}
                Err(e) => {
                    persist_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = persist_error {
            error!(place_id = %place.place_id, error = %e, "Persisting reviews failed");
            return PlaceCheckResult {
                place_id: place.place_id.clone(),
                client_id: place.client_id.clone(),
                branch_id: place.branch_id.clone(),
                status: CheckStatus::Failed,
                new_reviews_count: persisted.len(),
                webhook_sent: false,
                error: Some(e.to_string()),
                checked_at,
            };
        }

        // Non-fatal problems still land in the result so a cycle summary
        // shows them; the reviews themselves are already persisted.
        let mut problems: Vec<String> = Vec::new();

        if let Err(e) = self.advance_checkpoint(place, checked_at).await {
            warn!(place_id = %place.place_id, error = %e, "Updating checkpoint failed");
            problems.push(format!("Checkpoint update failed: {e}"));
        }

        let mut webhook_sent = false;
        if !persisted.is_empty() {
            match self.dispatcher.notify(&self.store, place, &persisted).await {
                Ok(true) => webhook_sent = true,
                // Reviews stay persisted and unnotified; the check itself
                // still succeeded.
                Ok(false) => problems.push("Webhook delivery failed".to_string()),
                Err(e) => problems.push(format!("Webhook bookkeeping failed: {e}")),
            }
        }
        let error = if problems.is_empty() {
            None
        } else {
            Some(problems.join("; "))
        };

        info!(
            place_id = %place.place_id,
            new_reviews = persisted.len(),
            webhook_sent,
            "Place check complete"
        );
        PlaceCheckResult {
            place_id: place.place_id.clone(),
            client_id: place.client_id.clone(),
            branch_id: place.branch_id.clone(),
            status: CheckStatus::Success,
            new_reviews_count: persisted.len(),
            webhook_sent,
            error,
            checked_at,
        }
    }

    async fn advance_checkpoint(&self, place: &Place, checked_at: DateTime<Utc>) -> Result<()> {
        let count = self.store.count_for_place(&place.place_id).await?;
        self.store
            .update_place_checkpoint(&place.place_id, checked_at, count)
            .await
    }

    /// Launch a driver, scan under the job timeout, and close the driver on
    /// every path out.
    async fn scan_place(&self, place: &Place) -> Result<Vec<ReviewRecord>> {
        let mut driver = self
            .factory
            .launch()
            .await
            .context("Launching browser session failed")?;

        let outcome =
            tokio::time::timeout(self.settings.job_timeout, self.scan_with_driver(place, &mut driver))
                .await;
        driver.close().await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "Place check timed out after {:?}",
                self.settings.job_timeout
            )),
        }
    }

    async fn scan_with_driver<D: PageDriver>(
        &self,
        place: &Place,
        driver: &mut D,
    ) -> Result<Vec<ReviewRecord>> {
        driver
            .open(&place.url)
            .await
            .with_context(|| format!("Opening {} failed", place.url))?;

        // Newest-first ordering is what makes the early stop below sound.
        // A place we cannot sort is a place we cannot check incrementally.
        driver
            .select_sort(SortOrder::Newest)
            .await
            .context("Sorting reviews newest-first failed")?;

        let limits = RunLimits::for_target(
            self.settings.max_new_per_check,
            self.settings.max_scrolls,
            self.settings.pass_delay,
        );
        let mut run = ExtractionRun::new(driver, limits);
        let mut collected = Vec::new();

        'scan: while let Some(batch) = run.next_batch().await? {
            for record in batch {
                if let Some(cutoff) = self.settings.min_review_date {
                    if record.review_date < cutoff {
                        info!(place_id = %place.place_id, "Reached review date cutoff");
                        break 'scan;
                    }
                }
                if self.store.exists(&record.id_review).await? {
                    info!(
                        place_id = %place.place_id,
                        id_review = %record.id_review,
                        "Reached already-persisted review, stopping scan"
                    );
                    break 'scan;
                }
                collected.push(record);
                if collected.len() >= self.settings.max_new_per_check {
                    warn!(
                        place_id = %place.place_id,
                        cap = self.settings.max_new_per_check,
                        "New-review cap reached, stopping scan"
                    );
                    break 'scan;
                }
            }
        }

        Ok(collected)
    }
}
