//! Trait seams over the browser session.
//!
//! The monitor and the extraction run loop only ever see `PageDriver`, so
//! they test against a scripted mock: no browser, no network. One driver is
//! exclusively owned by one in-flight place check.

use async_trait::async_trait;

use chrome_session::{ChromeSession, Paginator, SessionError, SessionOptions};
use placewatch_common::SortOrder;

#[async_trait]
pub trait PageDriver: Send {
    /// Navigate to a place URL and clear the consent prompt if present.
    async fn open(&mut self, url: &str) -> Result<(), SessionError>;

    /// Select a review sort order via the sort menu.
    async fn select_sort(&mut self, order: SortOrder) -> Result<(), SessionError>;

    /// Attempt to trigger lazy-load of more reviews. True = scroll progress.
    async fn advance(&mut self) -> bool;

    /// Expand truncated captions before the next parse pass.
    async fn expand_reviews(&mut self);

    /// Rendered-document HTML snapshot.
    async fn html(&mut self) -> Result<String, SessionError>;

    /// Release browser resources. Idempotent; must run on every exit path.
    async fn close(&mut self);
}

#[async_trait]
pub trait DriverFactory: Send + Sync {
    type Driver: PageDriver;

    async fn launch(&self) -> anyhow::Result<Self::Driver>;
}

// --- Chromium-backed driver ---

pub struct ChromeDriver {
    session: Option<ChromeSession>,
    paginator: Paginator,
}

impl ChromeDriver {
    fn session(&self) -> Result<&ChromeSession, SessionError> {
        self.session
            .as_ref()
            .ok_or_else(|| SessionError::Cdp("session already closed".to_string()))
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn open(&mut self, url: &str) -> Result<(), SessionError> {
        self.session()?.open(url).await
    }

    async fn select_sort(&mut self, order: SortOrder) -> Result<(), SessionError> {
        self.session()?.select_sort(order).await
    }

    async fn advance(&mut self) -> bool {
        match self.session() {
            Ok(session) => self.paginator.advance(session.page()).await,
            Err(_) => false,
        }
    }

    async fn expand_reviews(&mut self) {
        if let Ok(session) = self.session() {
            session.expand_reviews().await;
        }
    }

    async fn html(&mut self) -> Result<String, SessionError> {
        self.session()?.content().await
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }
}

pub struct ChromeDriverFactory {
    options: SessionOptions,
}

impl ChromeDriverFactory {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl DriverFactory for ChromeDriverFactory {
    type Driver = ChromeDriver;

    async fn launch(&self) -> anyhow::Result<Self::Driver> {
        let session = ChromeSession::launch(&self.options).await?;
        Ok(ChromeDriver {
            session: Some(session),
            paginator: Paginator::new(),
        })
    }
}
