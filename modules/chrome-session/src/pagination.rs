use chromiumoxide::Page;
use serde::Deserialize;
use tracing::{debug, warn};

/// One lazy-load scroll technique: a JS probe that records scroll offsets
/// before and after, reporting whether anything actually moved.
struct ScrollStrategy {
    name: &'static str,
    js: &'static str,
}

#[derive(Debug, Deserialize)]
struct ScrollProbe {
    moved: bool,
}

/// Measures the scroll offsets we care about: the review-card ancestry plus
/// the known scroll containers and the document itself.
const PROBE_HELPERS: &str = r#"
    const offsets = () => {
        let total = document.documentElement.scrollTop + document.body.scrollTop;
        const card = document.querySelector('div.jftiEf');
        let el = card;
        for (let i = 0; el && i < 10; i++) { total += el.scrollTop; el = el.parentElement; }
        for (const div of document.querySelectorAll('div[role="main"], div.m6QErb')) {
            total += div.scrollTop;
        }
        return total;
    };
    const settle = () => new Promise(r => setTimeout(r, 300));
"#;

/// Scroll the review card's scrollable ancestry directly.
const SCROLL_ANCESTORS: &str = r#"(async () => {
    PROBE
    const before = offsets();
    let el = document.querySelector('div.jftiEf');
    for (let i = 0; el && i < 10; i++) {
        el.scrollTop += 3000;
        el.scrollBy(0, 3000);
        el.dispatchEvent(new Event('scroll'));
        el = el.parentElement;
    }
    await settle();
    return { moved: offsets() > before };
})()"#;

/// Synthetic wheel events at the last visible review card.
const SCROLL_WHEEL: &str = r#"(async () => {
    PROBE
    const before = offsets();
    const cards = document.querySelectorAll('div.jftiEf.fontBodyMedium');
    if (cards.length === 0) return { moved: false };
    const target = cards[cards.length - 1];
    for (let i = 0; i < 5; i++) {
        target.dispatchEvent(new WheelEvent('wheel', {
            deltaY: 500, bubbles: true, cancelable: true
        }));
    }
    target.scrollIntoView({ behavior: 'auto', block: 'end' });
    await settle();
    return { moved: offsets() > before };
})()"#;

/// Keyboard paging aimed at the review list.
const SCROLL_KEYBOARD: &str = r#"(async () => {
    PROBE
    const before = offsets();
    const cards = document.querySelectorAll('div.jftiEf.fontBodyMedium');
    const target = cards.length ? cards[cards.length - 1] : document.body;
    const key = (k) => target.dispatchEvent(new KeyboardEvent('keydown', {
        key: k, bubbles: true, cancelable: true
    }));
    for (let i = 0; i < 10; i++) key('ArrowDown');
    for (let i = 0; i < 3; i++) key('PageDown');
    await settle();
    return { moved: offsets() > before };
})()"#;

/// Brute force: window plus every div on the page.
const SCROLL_FORCE_ALL: &str = r#"(async () => {
    PROBE
    const before = offsets();
    window.scrollBy(0, 1000);
    document.body.scrollTop += 1000;
    document.documentElement.scrollTop += 1000;
    for (const div of document.querySelectorAll('div')) {
        div.scrollTop += 2000;
    }
    await settle();
    return { moved: offsets() > before };
})()"#;

/// Known scroll-container selectors, tried last because they drift fastest.
const SCROLL_TARGETED: &str = r#"(async () => {
    PROBE
    const before = offsets();
    const selectors = [
        'div[role="main"]',
        'div.m6QErb',
        'div[aria-label*="Reviews"]',
        'div[aria-label*="Reseñas"]',
        '.section-scrollbox'
    ];
    for (const sel of selectors) {
        for (const el of document.querySelectorAll(sel)) {
            el.scrollTop += 5000;
        }
    }
    await settle();
    return { moved: offsets() > before };
})()"#;

/// Ordered technique list; new strategies get appended here, the control
/// flow never changes.
const STRATEGIES: &[ScrollStrategy] = &[
    ScrollStrategy { name: "ancestor_scroll", js: SCROLL_ANCESTORS },
    ScrollStrategy { name: "wheel_events", js: SCROLL_WHEEL },
    ScrollStrategy { name: "keyboard_paging", js: SCROLL_KEYBOARD },
    ScrollStrategy { name: "force_all", js: SCROLL_FORCE_ALL },
    ScrollStrategy { name: "targeted_containers", js: SCROLL_TARGETED },
];

/// Triggers lazy-load of additional reviews by scrolling the session's page.
///
/// `advance` returns whether any technique produced forward scroll progress.
/// A false return is not fatal; rendering may still reveal content
/// passively; stall detection (no new *parsed records*) lives in the caller.
pub struct Paginator;

impl Paginator {
    pub fn new() -> Self {
        Self
    }

    pub async fn advance(&self, page: &Page) -> bool {
        for strategy in STRATEGIES {
            let js = strategy.js.replace("PROBE", PROBE_HELPERS);
            match page.evaluate(js).await {
                Ok(result) => match result.into_value::<ScrollProbe>() {
                    Ok(probe) if probe.moved => {
                        debug!(strategy = strategy.name, "Scroll advanced");
                        return true;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(strategy = strategy.name, error = %e, "Probe unreadable"),
                },
                Err(e) => debug!(strategy = strategy.name, error = %e, "Scroll strategy failed"),
            }
        }
        warn!("All scroll strategies failed to move the page");
        false
    }
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_list_is_ordered_and_named() {
        // Cheapest technique first; the drift-prone targeted selectors last.
        let names: Vec<&str> = STRATEGIES.iter().map(|s| s.name).collect();
        assert_eq!(names.first(), Some(&"ancestor_scroll"));
        assert_eq!(names.last(), Some(&"targeted_containers"));
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn probes_substitute_helpers() {
        for strategy in STRATEGIES {
            assert!(strategy.js.contains("PROBE"), "{} misses probe", strategy.name);
            assert!(strategy.js.contains("moved"), "{} misses result", strategy.name);
        }
    }
}
