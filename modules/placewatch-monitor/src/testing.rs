//! Scripted stand-ins for the browser session. Unit tests drive the
//! extraction loop and the monitor against canned HTML snapshots: no
//! browser, no network, no database.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use chrome_session::SessionError;
use placewatch_common::SortOrder;

use crate::traits::{DriverFactory, PageDriver};

/// Render one review card the way the source page structures it.
pub fn review_card(
    id: &str,
    username: Option<&str>,
    rating: Option<u8>,
    caption: Option<&str>,
    relative: Option<&str>,
) -> String {
    let aria = username
        .map(|u| format!(" aria-label=\"{u}\""))
        .unwrap_or_default();
    let mut body = String::new();
    if let Some(r) = rating {
        body.push_str(&format!(r#"<span class="kvMYJc" aria-label="{r} stars"></span>"#));
    }
    if let Some(rel) = relative {
        body.push_str(&format!(r#"<span class="rsqaWe">{rel}</span>"#));
    }
    if let Some(c) = caption {
        body.push_str(&format!(r#"<span class="wiI7pd">{c}</span>"#));
    }
    if username.is_some() {
        body.push_str(r#"<div class="RfnDt">Local Guide · 12 reviews · 4 photos</div>"#);
        body.push_str(&format!(
            r#"<button class="WEBjve" data-href="https://maps.example.com/contrib/{id}"></button>"#
        ));
    }
    format!(r#"<div class="jftiEf fontBodyMedium" data-review-id="{id}"{aria}>{body}</div>"#)
}

/// What a mock driver was asked to do, shared with the test for assertions.
#[derive(Debug, Default)]
pub struct DriverLog {
    pub opened: Vec<String>,
    pub sorted: Vec<SortOrder>,
    pub closed: u32,
}

pub struct MockDriver {
    snapshots: Vec<String>,
    cursor: usize,
    fail_open: bool,
    fail_sort: bool,
    pub log: Arc<Mutex<DriverLog>>,
}

impl MockDriver {
    /// `snapshots[0]` is the document before any scroll; each `advance`
    /// moves to the next snapshot while one remains.
    pub fn with_snapshots(snapshots: Vec<String>) -> Self {
        Self {
            snapshots,
            cursor: 0,
            fail_open: false,
            fail_sort: false,
            log: Arc::new(Mutex::new(DriverLog::default())),
        }
    }

    pub fn failing_open() -> Self {
        let mut driver = Self::with_snapshots(Vec::new());
        driver.fail_open = true;
        driver
    }

    pub fn failing_sort(snapshots: Vec<String>) -> Self {
        let mut driver = Self::with_snapshots(snapshots);
        driver.fail_sort = true;
        driver
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn open(&mut self, url: &str) -> Result<(), SessionError> {
        self.log.lock().unwrap().opened.push(url.to_string());
        if self.fail_open {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                message: "page crashed".to_string(),
            });
        }
        Ok(())
    }

    async fn select_sort(&mut self, order: SortOrder) -> Result<(), SessionError> {
        if self.fail_sort {
            return Err(SessionError::SortMenuNotFound { attempts: 5 });
        }
        self.log.lock().unwrap().sorted.push(order);
        Ok(())
    }

    async fn advance(&mut self) -> bool {
        if self.cursor + 1 < self.snapshots.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    async fn expand_reviews(&mut self) {}

    async fn html(&mut self) -> Result<String, SessionError> {
        Ok(self.snapshots.get(self.cursor).cloned().unwrap_or_default())
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }
}

/// Hands out pre-built drivers in order, one per place check.
pub struct MockFactory {
    drivers: Mutex<VecDeque<MockDriver>>,
}

impl MockFactory {
    pub fn new(drivers: Vec<MockDriver>) -> Self {
        Self {
            drivers: Mutex::new(drivers.into()),
        }
    }
}

#[async_trait]
impl DriverFactory for MockFactory {
    type Driver = MockDriver;

    async fn launch(&self) -> anyhow::Result<Self::Driver> {
        self.drivers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("mock factory exhausted"))
    }
}
