//! The canonical extraction run loop: scroll, settle, expand, parse, dedup.
//!
//! One `ExtractionRun` is one pass over one place's review list. The caller
//! pulls batches of never-seen-this-run records until the run is exhausted:
//! either the scroll ceiling was hit or enough consecutive passes produced
//! nothing new (stall). What to *do* with a batch (store-dedup, cutoffs,
//! caps) is the caller's policy, not the loop's.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use placewatch_common::ReviewRecord;

use crate::dedup::DedupTracker;
use crate::extractor::ReviewExtractor;
use crate::traits::PageDriver;

/// Absolute scroll ceiling regardless of the requested review count.
pub const MAX_SCROLLS: u32 = 40;
/// Consecutive no-new-record passes before declaring a stall.
pub const MAX_EMPTY_PASSES: u32 = 3;
/// Production settle wait between a scroll and the following parse.
pub const DEFAULT_PASS_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Hard bound on scroll passes for this run.
    pub max_scrolls: u32,
    /// Stall threshold: passes yielding zero new records, counted
    /// consecutively.
    pub max_empty_passes: u32,
    /// Settle wait between a scroll and the following parse; the review list
    /// loads over AJAX.
    pub pass_delay: Duration,
}

impl RunLimits {
    /// Size the scroll budget relative to how many reviews the caller wants:
    /// roughly ten reviews surface per scroll, plus slack.
    pub fn for_target(target_reviews: usize, max_scrolls_cap: u32, pass_delay: Duration) -> Self {
        let estimated = (target_reviews / 10 + 5) as u32;
        Self {
            max_scrolls: estimated.min(max_scrolls_cap.min(MAX_SCROLLS)),
            max_empty_passes: MAX_EMPTY_PASSES,
            pass_delay,
        }
    }

    #[cfg(test)]
    pub fn instant(max_scrolls: u32) -> Self {
        Self {
            max_scrolls,
            max_empty_passes: MAX_EMPTY_PASSES,
            pass_delay: Duration::ZERO,
        }
    }
}

pub struct ExtractionRun<'d, D: PageDriver> {
    driver: &'d mut D,
    extractor: ReviewExtractor,
    dedup: DedupTracker,
    limits: RunLimits,
    scrolls: u32,
    empty_passes: u32,
    first_pass_done: bool,
    exhausted: bool,
}

impl<'d, D: PageDriver> ExtractionRun<'d, D> {
    pub fn new(driver: &'d mut D, limits: RunLimits) -> Self {
        Self {
            driver,
            extractor: ReviewExtractor::new(),
            dedup: DedupTracker::new(),
            limits,
            scrolls: 0,
            empty_passes: 0,
            first_pass_done: false,
            exhausted: false,
        }
    }

    /// Pull the next batch of records not yet seen this run. `Ok(None)` once
    /// the run is exhausted; every later call stays `Ok(None)`.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<ReviewRecord>>> {
        while !self.exhausted {
            if self.first_pass_done {
                if self.scrolls >= self.limits.max_scrolls {
                    info!(scrolls = self.scrolls, "Scroll ceiling reached");
                    self.exhausted = true;
                    break;
                }
                // A failed advance is not fatal: content may still load
                // passively, and the stall counter below bounds us.
                let moved = self.driver.advance().await;
                self.scrolls += 1;
                if !moved {
                    debug!(scroll = self.scrolls, "No scroll progress this pass");
                }
                tokio::time::sleep(self.limits.pass_delay).await;
            }

            self.driver.expand_reviews().await;
            let html = self
                .driver
                .html()
                .await
                .context("Reading page content failed")?;

            let parsed = self.extractor.parse_visible(&html, Utc::now());
            let fresh = self.dedup.filter_new(parsed);
            let was_first = !self.first_pass_done;
            self.first_pass_done = true;

            if fresh.is_empty() {
                // The pre-scroll pass gets a pass: the list may simply not
                // have rendered yet.
                if !was_first {
                    self.empty_passes += 1;
                    debug!(
                        empty = self.empty_passes,
                        max = self.limits.max_empty_passes,
                        "Pass yielded no new records"
                    );
                    if self.empty_passes >= self.limits.max_empty_passes {
                        info!(
                            scrolls = self.scrolls,
                            seen = self.dedup.seen_count(),
                            "Pagination stalled, stopping run"
                        );
                        self.exhausted = true;
                    }
                }
                continue;
            }

            self.empty_passes = 0;
            debug!(
                batch = fresh.len(),
                total = self.dedup.seen_count(),
                scrolls = self.scrolls,
                "Extraction pass complete"
            );
            return Ok(Some(fresh));
        }

        Ok(None)
    }

    pub fn scrolls(&self) -> u32 {
        self.scrolls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{review_card, MockDriver};

    fn page(ids: &[&str]) -> String {
        ids.iter()
            .map(|id| review_card(id, Some("User"), Some(4), Some("text"), Some("2 days ago")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn for_target_sizes_the_budget_and_keeps_the_delay() {
        let limits = RunLimits::for_target(100, 40, Duration::from_millis(1));
        assert_eq!(limits.max_scrolls, 15);
        assert_eq!(limits.pass_delay, Duration::from_millis(1));

        let capped = RunLimits::for_target(1000, 40, Duration::ZERO);
        assert_eq!(capped.max_scrolls, 40);
        assert_eq!(capped.pass_delay, Duration::ZERO);
    }

    #[tokio::test]
    async fn batches_contain_only_unseen_records() {
        // Pass 0 shows [a, b]; after a scroll the DOM holds [a, b, c, d].
        let mut driver = MockDriver::with_snapshots(vec![
            page(&["a", "b"]),
            page(&["a", "b", "c", "d"]),
        ]);
        let mut run = ExtractionRun::new(&mut driver, RunLimits::instant(10));

        let first = run.next_batch().await.unwrap().unwrap();
        assert_eq!(ids(&first), vec!["a", "b"]);

        let second = run.next_batch().await.unwrap().unwrap();
        assert_eq!(ids(&second), vec!["c", "d"]);
    }

    #[tokio::test]
    async fn same_document_twice_yields_each_id_once() {
        let snapshot = page(&["a", "b", "c"]);
        let mut driver = MockDriver::with_snapshots(vec![snapshot.clone(), snapshot]);
        let mut run = ExtractionRun::new(&mut driver, RunLimits::instant(10));

        let mut all = Vec::new();
        while let Some(batch) = run.next_batch().await.unwrap() {
            all.extend(batch);
        }
        let mut seen = ids(&all);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), all.len(), "a review id was emitted twice");
    }

    #[tokio::test]
    async fn stalls_after_three_empty_passes() {
        // Content never grows after the first snapshot.
        let snapshot = page(&["a"]);
        let mut driver = MockDriver::with_snapshots(vec![snapshot; 20]);
        let mut run = ExtractionRun::new(&mut driver, RunLimits::instant(20));

        assert!(run.next_batch().await.unwrap().is_some());
        assert!(run.next_batch().await.unwrap().is_none());
        assert_eq!(run.scrolls(), MAX_EMPTY_PASSES);
    }

    #[tokio::test]
    async fn scroll_ceiling_bounds_the_run() {
        // Every snapshot introduces a new id, so the stall counter never
        // trips; only the ceiling can stop the run.
        let snapshots: Vec<String> = (0..50)
            .map(|i| {
                let all: Vec<String> = (0..=i).map(|j| format!("id-{j}")).collect();
                page(&all.iter().map(String::as_str).collect::<Vec<_>>())
            })
            .collect();
        let mut driver = MockDriver::with_snapshots(snapshots);
        let mut run = ExtractionRun::new(&mut driver, RunLimits::instant(4));

        let mut total = 0;
        while let Some(batch) = run.next_batch().await.unwrap() {
            total += batch.len();
        }
        assert_eq!(run.scrolls(), 4);
        // Pass 0 plus 4 scroll passes, one new id each
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn empty_first_pass_is_not_a_stall() {
        // Nothing rendered before the first scroll; list appears afterwards.
        let mut driver = MockDriver::with_snapshots(vec![
            String::new(),
            page(&["a", "b"]),
        ]);
        let mut run = ExtractionRun::new(&mut driver, RunLimits::instant(10));

        let batch = run.next_batch().await.unwrap().unwrap();
        assert_eq!(ids(&batch), vec!["a", "b"]);
    }

    fn ids(records: &[placewatch_common::ReviewRecord]) -> Vec<String> {
        records.iter().map(|r| r.id_review.clone()).collect()
    }
}
