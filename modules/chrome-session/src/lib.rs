pub mod error;
pub mod pagination;

pub use error::{Result, SessionError};
pub use pagination::Paginator;

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use placewatch_common::SortOrder;

/// CSS selector for one review card. The single most drift-prone selector in
/// the system; both the settle wait and the extractor key off it.
pub const REVIEW_CARD_SELECTOR: &str = "div.jftiEf.fontBodyMedium";

/// Per-selector wait when probing for an element.
const ELEMENT_WAIT: Duration = Duration::from_millis(2500);
/// Full retry budget for the sort-menu trigger.
const SORT_MAX_ATTEMPTS: u32 = 5;
/// Backoff between sort-menu attempt rounds.
const SORT_RETRY_BACKOFF: Duration = Duration::from_secs(2);
/// Upper bound for the network-idle settle wait after sorting.
const SETTLE_NETWORK_IDLE: Duration = Duration::from_secs(15);

/// Ordered selector strategies for the sort-menu trigger. The control's
/// attributes vary by locale and rollout; tried in sequence until one hits.
const SORT_TRIGGER_SELECTORS: &[&str] = &[
    "button[aria-label*='Sort']",
    "button[aria-label*='Ordenar']",
    "button[data-value*='Sort']",
    "button.g88MCb.S9kvJb",
];

const SORT_MENU_ITEM_SELECTOR: &str = "div[role='menuitemradio']";

/// Localized labels of the cookie-consent "reject all" control.
const COOKIE_REJECT_LABELS: &[&str] = &["Reject all", "Rechazar todo"];

/// Plausible desktop user agent; the headless default advertises itself.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Masks the obvious automation tells before any page script runs.
const STEALTH_INIT_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', {
        get: () => ['es-ES', 'es', 'en-US', 'en']
    });
    window.chrome = window.chrome || { runtime: {} };
"#;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    pub chrome_executable: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
        }
    }
}

/// One exclusively-owned Chromium page. Opens a place URL, drives the cookie
/// prompt and the sort menu, and hands out rendered-document snapshots.
///
/// Callers own the lifecycle: [`ChromeSession::close`] must run on every exit
/// path, including timeouts.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromeSession {
    /// Launch a fresh Chromium and open a blank page with the stealth init
    /// script installed.
    pub async fn launch(options: &SessionOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1366, 768)
            .args(vec![
                "--disable-blink-features=AutomationControlled".to_string(),
                "--disable-notifications".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-gpu".to_string(),
                "--disable-infobars".to_string(),
                "--lang=es-ES".to_string(),
                format!("--user-agent={USER_AGENT}"),
                "--accept-lang=es-ES,es;q=0.9,en;q=0.8".to_string(),
            ]);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(ref bin) = options.chrome_executable {
            builder = builder.chrome_executable(bin);
        }
        let config = builder.build().map_err(SessionError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        // Drain CDP events for the lifetime of the session.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            STEALTH_INIT_SCRIPT,
        ))
        .await?;

        info!(headless = options.headless, "Chrome session launched");
        Ok(Self {
            browser,
            page,
            handler_task,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigate to a place URL and dismiss the cookie-consent prompt if one
    /// appears. Prompt absence is the common case and not an error.
    pub async fn open(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| SessionError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let _ = self.page.wait_for_navigation().await;

        if self.dismiss_cookie_prompt().await {
            debug!(url, "Cookie prompt dismissed");
            sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }

    /// Click the "reject all" control when a consent prompt covers the page.
    /// Returns whether anything was clicked.
    async fn dismiss_cookie_prompt(&self) -> bool {
        let labels = serde_json::to_string(COOKIE_REJECT_LABELS).expect("static labels serialize");
        let js = format!(
            r#"(() => {{
                const labels = {labels};
                const controls = document.querySelectorAll('button, [role="button"]');
                for (const el of controls) {{
                    const text = (el.innerText || '').trim();
                    const aria = el.getAttribute('aria-label') || '';
                    if (labels.some(l => text === l || aria.includes(l))) {{
                        el.click();
                        return true;
                    }}
                }}
                return false;
            }})()"#
        );
        match self.page.evaluate(js).await {
            Ok(result) => result.into_value::<bool>().unwrap_or(false),
            Err(e) => {
                debug!(error = %e, "Cookie prompt probe failed");
                false
            }
        }
    }

    /// Open the sort-options menu and pick `order`.
    ///
    /// The trigger is located through [`SORT_TRIGGER_SELECTORS`], the whole
    /// list retried up to [`SORT_MAX_ATTEMPTS`] with backoff. All-miss is the
    /// recoverable [`SessionError::SortMenuNotFound`] (callers may continue
    /// with the default order); an out-of-range menu index is a hard failure.
    pub async fn select_sort(&self, order: SortOrder) -> Result<()> {
        let mut attempts = 0;
        let mut opened = false;

        while !opened && attempts < SORT_MAX_ATTEMPTS {
            for selector in SORT_TRIGGER_SELECTORS {
                let Some(trigger) = self.find_with_timeout(selector, ELEMENT_WAIT).await else {
                    continue;
                };
                match trigger.click().await {
                    Ok(_) => {
                        debug!(selector, "Sort trigger clicked");
                        opened = true;
                        break;
                    }
                    Err(e) => debug!(selector, error = %e, "Sort trigger click failed"),
                }
            }
            if !opened {
                attempts += 1;
                warn!(attempts, max = SORT_MAX_ATTEMPTS, "Sort menu not open yet");
                sleep(SORT_RETRY_BACKOFF).await;
            }
        }

        if !opened {
            return Err(SessionError::SortMenuNotFound {
                attempts: SORT_MAX_ATTEMPTS,
            });
        }

        // Menu animates in; give it a beat before enumerating options.
        sleep(Duration::from_secs(1)).await;

        let items = self.page.find_elements(SORT_MENU_ITEM_SELECTOR).await?;
        let index = order.menu_index();
        if index >= items.len() {
            return Err(SessionError::SortOptionOutOfRange {
                index,
                available: items.len(),
            });
        }
        items[index].click().await?;
        info!(?order, index, "Sort option selected");

        self.settle_after_sort().await;
        Ok(())
    }

    /// The review list reloads over AJAX after sorting; reading too early
    /// sees the stale order. Network-idle heuristic plus an unconditional
    /// extra delay, then wait for review cards to be present.
    async fn settle_after_sort(&self) {
        sleep(Duration::from_secs(2)).await;
        self.wait_for_network_idle(SETTLE_NETWORK_IDLE).await;
        sleep(Duration::from_secs(3)).await;

        if self
            .find_with_timeout(REVIEW_CARD_SELECTOR, SETTLE_NETWORK_IDLE)
            .await
            .is_none()
        {
            warn!(
                selector = REVIEW_CARD_SELECTOR,
                "No review cards visible after sorting"
            );
        }
    }

    /// In-page idle heuristic: readyState complete and a stable resource
    /// count for one second. CDP exposes no stable network-idle signal, so
    /// this polls from inside the page.
    async fn wait_for_network_idle(&self, timeout: Duration) {
        let timeout_ms = timeout.as_millis() as u64;
        let js = format!(
            r#"(async () => {{
                const deadline = Date.now() + {timeout_ms};
                const interval = 250;
                let last = performance.getEntriesByType('resource').length;
                let stable = 0;
                while (Date.now() < deadline) {{
                    await new Promise(r => setTimeout(r, interval));
                    const cur = performance.getEntriesByType('resource').length;
                    if (document.readyState === 'complete' && cur === last) {{
                        stable += interval;
                        if (stable >= 1000) return true;
                    }} else {{
                        stable = 0;
                    }}
                    last = cur;
                }}
                return false;
            }})()"#
        );
        match self.page.evaluate(js).await {
            Ok(result) => {
                if !result.into_value::<bool>().unwrap_or(false) {
                    debug!("Network-idle heuristic timed out");
                }
            }
            Err(e) => debug!(error = %e, "Network-idle heuristic failed"),
        }
    }

    /// Click every "read more" expander so captions are fully rendered
    /// before the next parse pass. Returns how many were clicked.
    pub async fn expand_reviews(&self) -> u32 {
        let js = r#"(() => {
            let clicked = 0;
            for (const btn of document.querySelectorAll('button.w8nwRe.kyuRq')) {
                try { btn.click(); clicked += 1; } catch (_) {}
            }
            return clicked;
        })()"#;
        match self.page.evaluate(js).await {
            Ok(result) => {
                let clicked = result.into_value::<u32>().unwrap_or(0);
                if clicked > 0 {
                    debug!(clicked, "Expanded review captions");
                }
                clicked
            }
            Err(e) => {
                debug!(error = %e, "Expand pass failed");
                0
            }
        }
    }

    /// Full rendered-document HTML snapshot.
    pub async fn content(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    /// Poll for an element until `timeout` elapses.
    async fn find_with_timeout(&self, selector: &str, timeout: Duration) -> Option<Element> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(element) = self.page.find_element(selector).await {
                return Some(element);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(250)).await;
        }
    }

    /// Release the browser: close Chromium, reap the child process, stop the
    /// CDP event drain. Best-effort on each step so a wedged browser can
    /// never leak the handler task.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Browser close failed");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Browser wait failed");
        }
        self.handler_task.abort();
        info!("Chrome session closed");
    }
}
