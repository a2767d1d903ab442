//! Parses the rendered place page into structured records.
//!
//! Pure over an HTML snapshot: no browser handle, no I/O, never errors.
//! Every field is extracted independently so one mis-shaped element costs a
//! `None`, not the record; only a card with no extractable review id is
//! dropped. The extractor must be re-run over the *entire* visible document
//! after every pagination advance; the DOM keeps previously-seen cards
//! intermixed with new ones, and dedup is the caller's job.

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::trace;

use placewatch_common::{PlaceInfo, ReviewRecord};

use crate::relative_date;

pub struct ReviewExtractor {
    card: Selector,
    caption: Selector,
    stars: Selector,
    relative: Selector,
    reviewer_stats: Selector,
    profile: Selector,
    rating_re: Regex,
    reviews_count_re: Regex,
    photos_count_re: Regex,
}

impl ReviewExtractor {
    pub fn new() -> Self {
        Self {
            // All class selectors subject to drift on the source side.
            card: sel("div.jftiEf.fontBodyMedium"),
            caption: sel("span.wiI7pd"),
            stars: sel("span.kvMYJc"),
            relative: sel("span.rsqaWe"),
            reviewer_stats: sel("div.RfnDt"),
            profile: sel("button.WEBjve"),
            rating_re: Regex::new(r"(\d+)").expect("valid regex"),
            reviews_count_re: Regex::new(r"(?i)([\d.,]*\d)\s*(?:reviews?|reseñas?)")
                .expect("valid regex"),
            photos_count_re: Regex::new(r"(?i)([\d.,]*\d)\s*(?:photos?|fotos?)")
                .expect("valid regex"),
        }
    }

    /// Parse every review card currently in the document.
    pub fn parse_visible(&self, html: &str, retrieved_at: DateTime<Utc>) -> Vec<ReviewRecord> {
        let document = Html::parse_document(html);
        let mut records = Vec::new();

        for card in document.select(&self.card) {
            let Some(id_review) = card.value().attr("data-review-id") else {
                // No identifier means nothing to dedup against; drop silently.
                trace!("Review card without data-review-id skipped");
                continue;
            };

            let mut record = ReviewRecord::new(id_review.to_string(), retrieved_at);

            record.username = card
                .value()
                .attr("aria-label")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from);

            record.caption = card
                .select(&self.caption)
                .next()
                .map(|el| normalize_whitespace(&text_of(el)))
                .filter(|s| !s.is_empty());

            // Rating comes from the stars' accessible label ("4 stars",
            // "4 estrellas"), not from counting star glyphs.
            record.rating = card
                .select(&self.stars)
                .next()
                .and_then(|el| el.value().attr("aria-label"))
                .and_then(|label| self.rating_re.captures(label))
                .and_then(|caps| caps[1].parse::<f64>().ok())
                .filter(|r| (1.0..=5.0).contains(r));

            record.relative_date = card
                .select(&self.relative)
                .next()
                .map(|el| text_of(el).trim().to_string())
                .filter(|s| !s.is_empty());
            if let Some(ref relative) = record.relative_date {
                record.review_date = relative_date::review_date_from(relative, retrieved_at);
            }

            if let Some(stats) = card.select(&self.reviewer_stats).next() {
                let text = text_of(stats);
                record.n_review_user = self.count_from(&self.reviews_count_re, &text);
                record.n_photo_user = self.count_from(&self.photos_count_re, &text);
            }

            record.url_user = card
                .select(&self.profile)
                .next()
                .and_then(|el| el.value().attr("data-href"))
                .map(String::from);

            records.push(record);
        }

        records
    }

    fn count_from(&self, re: &Regex, text: &str) -> Option<u32> {
        re.captures(text).and_then(|caps| {
            caps[1]
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .ok()
        })
    }
}

impl Default for ReviewExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Place-page header parser, same independent per-field fallback.
pub struct PlaceExtractor {
    name: Selector,
    rating_block: Selector,
    rating_stars: Selector,
    photos: Selector,
    category: Selector,
    description: Selector,
    detail_rows: Selector,
    opening_hours: Selector,
    float_re: Regex,
    parenthesized_re: Regex,
}

impl PlaceExtractor {
    pub fn new() -> Self {
        Self {
            name: sel("h1.DUwDvf.fontHeadlineLarge"),
            rating_block: sel("div.F7nice"),
            rating_stars: sel("span.ceNzKf"),
            photos: sel("div.YkuOqf"),
            category: sel("button[jsaction='pane.rating.category']"),
            description: sel("div.PYvSYb"),
            detail_rows: sel("div.Io6YTe.fontBodyMedium"),
            opening_hours: sel("div.t39EBf.GUrTXd"),
            float_re: Regex::new(r"(\d+[.,]\d+|\d+)").expect("valid regex"),
            parenthesized_re: Regex::new(r"\(([\d.,]+)\)").expect("valid regex"),
        }
    }

    pub fn parse_place(&self, html: &str, url: &str) -> PlaceInfo {
        let document = Html::parse_document(html);
        let mut info = PlaceInfo {
            url: url.to_string(),
            ..PlaceInfo::default()
        };

        info.name = document
            .select(&self.name)
            .next()
            .map(|el| text_of(el).trim().to_string())
            .filter(|s| !s.is_empty());

        if let Some(block) = document.select(&self.rating_block).next() {
            info.overall_rating = block
                .select(&self.rating_stars)
                .next()
                .and_then(|el| el.value().attr("aria-label"))
                .and_then(|label| self.float_re.captures(label))
                .and_then(|caps| caps[1].replace(',', ".").parse::<f64>().ok());
            info.n_reviews = self
                .parenthesized_re
                .captures(&text_of(block))
                .and_then(|caps| digits(&caps[1]));
        }

        info.n_photos = document
            .select(&self.photos)
            .next()
            .and_then(|el| digits(&text_of(el)));

        info.category = first_text(&document, &self.category);
        info.description = first_text(&document, &self.description);

        // Detail rows come in a fixed visual order on the place header.
        let rows: Vec<String> = document
            .select(&self.detail_rows)
            .map(|el| text_of(el).trim().to_string())
            .collect();
        info.address = rows.first().cloned();
        info.website = rows.get(1).cloned();
        info.phone_number = rows.get(2).cloned();
        info.plus_code = rows.get(3).cloned();

        info.opening_hours = document
            .select(&self.opening_hours)
            .next()
            .and_then(|el| el.value().attr("aria-label"))
            .map(|s| s.replace('\u{202f}', " "));

        info
    }
}

impl Default for PlaceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("valid selector")
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|el| text_of(el).trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Collapse carriage returns, newlines and tabs to single spaces.
fn normalize_whitespace(text: &str) -> String {
    text.replace(['\r', '\n', '\t'], " ").trim().to_string()
}

fn digits(text: &str) -> Option<u64> {
    let cleaned: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if cleaned.is_empty() {
        None
    } else {
        cleaned.parse().ok()
    }
}
