//! Review monitoring for map-service place pages.
//!
//! The extraction path drives a real Chromium session through the
//! `PageDriver` seam; everything above that seam (the run loop, the
//! incremental monitor, webhook delivery) is plain async code tested
//! against scripted drivers and an in-memory store.

pub mod dedup;
pub mod extractor;
pub mod monitor;
pub mod pipeline;
pub mod relative_date;
pub mod scrape;
pub mod store;
pub mod traits;
pub mod webhook;

#[cfg(test)]
pub mod testing;
