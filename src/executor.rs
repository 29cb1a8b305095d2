//! The action primitives. Every primitive takes the driver plus a loose
//! argument object, catches its own faults, and returns an
//! [`ActionOutcome`] - failures are data, never panics or propagated
//! errors.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::debug;

use crate::dom::{ElementNode, Rect, build_path, is_visible};
use crate::driver::PageDriver;
use crate::error::ActionError;
use crate::snapshot::is_button_like;
use crate::types::ActionOutcome;

/// Fixed polling cadence for selector waits.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub const WAIT_FOR_DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const LOAD_DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const IDLE_DEFAULT_QUIET_MS: u64 = 600;
pub const IDLE_DEFAULT_TIMEOUT_MS: u64 = 3_000;

/// Hard ceiling on a `wait` pause, in seconds.
pub const WAIT_MAX_SECONDS: u64 = 60;

/// Uniform timed-out result for the shared polling primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeout;

/// The one polling loop under every wait variant: probe, sleep `interval`,
/// repeat until the probe yields or the deadline passes. The probe always
/// runs at least once, and the final sleep never overshoots the deadline,
/// so termination is guaranteed.
pub fn poll_until<T>(
    timeout: Duration,
    interval: Duration,
    mut probe: impl FnMut() -> Option<T>,
) -> Result<T, WaitTimeout> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe() {
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(WaitTimeout);
        }
        thread::sleep(interval.min(deadline - now));
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn u64_arg(args: &Map<String, Value>, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

fn unexpected(err: anyhow::Error, selector: Option<&str>) -> ActionOutcome {
    debug!(error = %format!("{err:#}"), "primitive fault");
    ActionOutcome::failure(&ActionError::unexpected(&err)).maybe("selector", selector)
}

/// Click point: the element's center, clamped one pixel inside the box so
/// degenerate rects still land on the element.
fn click_point(rect: Rect) -> (f64, f64) {
    let x = (rect.x + rect.w / 2.0).clamp(rect.x + 1.0, (rect.x + rect.w - 1.0).max(rect.x + 1.0));
    let y = (rect.y + rect.h / 2.0).clamp(rect.y + 1.0, (rect.y + rect.h - 1.0).max(rect.y + 1.0));
    (x, y)
}

/// Resolve a click target: exact selector first, then a case-insensitive
/// substring search over visible clickable candidates by text or
/// aria-label.
fn resolve_target(
    driver: &dyn PageDriver,
    selector: Option<&str>,
    needle: Option<&str>,
) -> anyhow::Result<Option<(String, ElementNode)>> {
    if let Some(sel) = selector {
        if let Some(node) = driver.probe(sel)? {
            return Ok(Some((sel.to_string(), node)));
        }
    }
    let Some(needle) = needle.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    let needle = needle.to_lowercase();
    let tree = driver.collect()?;
    for (id, node) in tree.iter() {
        if !is_button_like(node) || !is_visible(node) {
            continue;
        }
        let text_hit = node.text.to_lowercase().contains(&needle);
        let label_hit = node
            .attr("aria-label")
            .is_some_and(|l| l.to_lowercase().contains(&needle));
        if text_hit || label_hit {
            if let Some(sel) = build_path(&tree, id) {
                return Ok(Some((sel, node.clone())));
            }
        }
    }
    Ok(None)
}

/// `click {selector?, text?, query?}` - interactability is re-checked at
/// click time, since visibility can change between snapshot and action.
/// Anchors are reported as always-potentially-navigating so the runner can
/// defer to tab-level navigation handling.
pub fn click(driver: &dyn PageDriver, args: &Map<String, Value>) -> ActionOutcome {
    let wanted = str_arg(args, "selector");
    let needle = str_arg(args, "text").or_else(|| str_arg(args, "query"));

    let resolved = match resolve_target(driver, wanted, needle) {
        Ok(r) => r,
        Err(e) => return unexpected(e, wanted),
    };
    let Some((selector, node)) = resolved else {
        return ActionOutcome::failure(&ActionError::NotFound).maybe("selector", wanted);
    };
    if node.is_disabled() || !is_visible(&node) {
        return ActionOutcome::failure(&ActionError::DisabledOrHidden)
            .with("selector", selector.as_str());
    }

    if let Err(e) = driver.scroll_into_view(&selector) {
        debug!(%selector, error = %e, "scroll_into_view failed, clicking anyway");
    }
    let (x, y) = click_point(node.rect.unwrap_or_default());
    for kind in ["mousemove", "mousedown", "mouseup"] {
        if let Err(e) = driver.fire_mouse(&selector, kind, x, y) {
            return unexpected(e, Some(selector.as_str()));
        }
    }
    // completion fallback for SPA handlers bound to the native click
    if let Err(e) = driver.native_click(&selector) {
        debug!(%selector, error = %e, "native click fallback failed");
    }

    let href = node.href().filter(|h| !h.is_empty()).map(str::to_owned);
    ActionOutcome::success()
        .with("selector", selector.as_str())
        .with("navigating", href.is_some())
        .maybe("href", href.clone())
        .maybe("navigate_to", href)
}

/// `type {selector, text|value}` - focus, clear + input, set + input,
/// change: three discrete synthetic events so frameworks listening on any
/// of the signals all observe the edit.
pub fn type_text(driver: &dyn PageDriver, args: &Map<String, Value>) -> ActionOutcome {
    let Some(selector) = str_arg(args, "selector") else {
        return ActionOutcome::failure(&ActionError::InputNotFound);
    };
    let value = str_arg(args, "text")
        .or_else(|| str_arg(args, "value"))
        .unwrap_or_default();

    match driver.probe(selector) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return ActionOutcome::failure(&ActionError::InputNotFound).with("selector", selector);
        }
        Err(e) => return unexpected(e, Some(selector)),
    }

    let sequence = || -> anyhow::Result<()> {
        driver.focus(selector)?;
        driver.set_value(selector, "")?;
        driver.fire(selector, "input")?;
        driver.set_value(selector, value)?;
        driver.fire(selector, "input")?;
        driver.fire(selector, "change")?;
        Ok(())
    };
    if let Err(e) = sequence() {
        return unexpected(e, Some(selector));
    }
    ActionOutcome::success()
        .with("selector", selector)
        .with("typed", value)
}

/// `wait_for {selector, timeout}` - poll until the selector resolves to a
/// visible element.
pub fn wait_for(driver: &dyn PageDriver, args: &Map<String, Value>) -> ActionOutcome {
    let Some(selector) = str_arg(args, "selector") else {
        return ActionOutcome::failure(&ActionError::NotFound);
    };
    let timeout = Duration::from_millis(u64_arg(args, "timeout").unwrap_or(WAIT_FOR_DEFAULT_TIMEOUT_MS));

    let outcome = poll_until(timeout, POLL_INTERVAL, || match driver.probe(selector) {
        Ok(Some(node)) if is_visible(&node) => Some(Ok(())),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    });
    match outcome {
        Ok(Ok(())) => ActionOutcome::success().with("selector", selector),
        Ok(Err(e)) => unexpected(e, Some(selector)),
        Err(WaitTimeout) => {
            ActionOutcome::failure(&ActionError::Timeout).with("selector", selector)
        }
    }
}

/// `nav {url}` - set the page location. Never a failure; `navigating` is
/// null when no url was supplied.
pub fn nav(driver: &dyn PageDriver, args: &Map<String, Value>) -> ActionOutcome {
    match str_arg(args, "url") {
        Some(url) if !url.is_empty() => {
            if let Err(e) = driver.navigate(url) {
                return unexpected(e, None);
            }
            ActionOutcome::success().with("navigating", url)
        }
        _ => ActionOutcome::success().with("navigating", Value::Null),
    }
}

/// `wait_for_load {timeout}` - soft wait for ready-state "complete"; a
/// timeout is reported in `state`, not raised.
pub fn wait_for_load(driver: &dyn PageDriver, args: &Map<String, Value>) -> ActionOutcome {
    let timeout = Duration::from_millis(u64_arg(args, "timeout").unwrap_or(LOAD_DEFAULT_TIMEOUT_MS));
    let reached = poll_until(timeout, POLL_INTERVAL, || {
        matches!(driver.ready_state().as_deref(), Ok("complete")).then_some(())
    });
    let state = match reached {
        Ok(()) => "complete".to_string(),
        Err(WaitTimeout) => driver.ready_state().unwrap_or_else(|_| "unknown".to_string()),
    };
    ActionOutcome::success()
        .with("state", state)
        .with("url", driver.url().unwrap_or_default())
}

/// `wait_for_idle {quietMs, timeout}` - ready-state complete plus an
/// unchanged serialized-body length across two consecutive polls. An
/// approximation, not a true network-idle signal: same-length DOM churn can
/// false-positive. Soft either way; callers proceed on `idle: false`.
pub fn wait_for_idle(driver: &dyn PageDriver, args: &Map<String, Value>) -> ActionOutcome {
    let quiet = u64_arg(args, "quietMs").unwrap_or(IDLE_DEFAULT_QUIET_MS).max(50);
    let timeout = Duration::from_millis(u64_arg(args, "timeout").unwrap_or(IDLE_DEFAULT_TIMEOUT_MS));

    let mut last_len: Option<u64> = None;
    let settled = poll_until(timeout, Duration::from_millis(quiet), || {
        let ready = matches!(driver.ready_state().as_deref(), Ok("complete"));
        let len = driver.body_length().ok();
        let idle = ready && len.is_some() && len == last_len;
        last_len = len;
        idle.then_some(())
    });
    ActionOutcome::success().with("idle", settled.is_ok())
}

/// `back {}` - fire-and-forget history navigation.
pub fn back(driver: &dyn PageDriver, _args: &Map<String, Value>) -> ActionOutcome {
    if let Err(e) = driver.back() {
        debug!(error = %format!("{e:#}"), "history back failed");
    }
    ActionOutcome::success().with("navigating", true)
}

/// Clamp a `wait` pause: seconds capped at [`WAIT_MAX_SECONDS`],
/// milliseconds at the same ceiling; the larger of the two wins.
pub fn clamp_wait_ms(seconds: Option<u64>, ms: Option<u64>) -> u64 {
    let mut wait = 0;
    if let Some(s) = seconds {
        wait = wait.max(s.min(WAIT_MAX_SECONDS) * 1_000);
    }
    if let Some(m) = ms {
        wait = wait.max(m.min(WAIT_MAX_SECONDS * 1_000));
    }
    wait
}

/// `wait {ms|seconds}` - pure bounded delay.
pub fn wait(_driver: &dyn PageDriver, args: &Map<String, Value>) -> ActionOutcome {
    let ms = clamp_wait_ms(u64_arg(args, "seconds"), u64_arg(args, "ms"));
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
    ActionOutcome::success().with("waited", ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeDriver, el};
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn click_resolves_selector_and_dispatches_mouse_sequence() {
        let driver = FakeDriver::with_page(
            el("body").child(el("button").id("go").text("Book Appointment").rect(120.0, 32.0)),
        );
        let outcome = click(&driver, &args(json!({"selector": "#go"})));
        assert!(outcome.is_ok());
        assert_eq!(outcome.str_field("selector"), Some("#go"));
        let state = driver.state.lock().unwrap();
        let kinds: Vec<&str> = state.mouse_events.iter().map(|(_, k)| k.as_str()).collect();
        assert_eq!(kinds, vec!["mousemove", "mousedown", "mouseup"]);
        assert_eq!(state.native_clicks, vec!["#go"]);
    }

    #[test]
    fn click_missing_selector_returns_structured_not_found() {
        let driver = FakeDriver::with_page(el("body"));
        let outcome = click(&driver, &args(json!({"selector": "#missing"})));
        assert!(!outcome.is_ok());
        assert_eq!(outcome.error(), Some("element not found"));
        assert_eq!(outcome.str_field("selector"), Some("#missing"));
    }

    #[test]
    fn click_on_disabled_element_dispatches_nothing() {
        let driver = FakeDriver::with_page(
            el("body").child(el("button").id("off").text("Submit").attr("disabled", "")),
        );
        let outcome = click(&driver, &args(json!({"selector": "#off"})));
        assert_eq!(outcome.error(), Some("element disabled or hidden"));
        let state = driver.state.lock().unwrap();
        assert!(state.mouse_events.is_empty());
        assert!(state.native_clicks.is_empty());
    }

    #[test]
    fn click_falls_back_to_text_search() {
        let driver = FakeDriver::with_page(
            el("body")
                .child(el("a").id("labs").text("View Lab Results").attr("href", "/labs")),
        );
        let outcome = click(&driver, &args(json!({"text": "lab results"})));
        assert!(outcome.is_ok());
        assert_eq!(outcome.str_field("selector"), Some("#labs"));
        assert_eq!(outcome.str_field("href"), Some("/labs"));
        assert_eq!(outcome.str_field("navigate_to"), Some("/labs"));
        assert!(outcome.signals_navigation());
    }

    #[test]
    fn click_without_href_does_not_signal_navigation() {
        let driver =
            FakeDriver::with_page(el("body").child(el("button").id("go").text("Expand")));
        let outcome = click(&driver, &args(json!({"selector": "#go"})));
        assert!(outcome.is_ok());
        assert!(!outcome.signals_navigation());
    }

    #[test]
    fn type_sets_value_and_fires_input_input_change() {
        let driver = FakeDriver::with_page(el("body").child(el("input").id("q")));
        let outcome = type_text(&driver, &args(json!({"selector": "#q", "text": "abc"})));
        assert!(outcome.is_ok());
        assert_eq!(outcome.str_field("typed"), Some("abc"));
        let state = driver.state.lock().unwrap();
        assert_eq!(state.values.get("#q").map(String::as_str), Some("abc"));
        assert_eq!(state.focused, vec!["#q"]);
        let fired: Vec<&str> = state.fired.iter().map(|(_, e)| e.as_str()).collect();
        assert_eq!(fired, vec!["input", "input", "change"]);
    }

    #[test]
    fn type_against_missing_input_fails() {
        let driver = FakeDriver::with_page(el("body"));
        let outcome = type_text(&driver, &args(json!({"selector": "#q", "text": "x"})));
        assert_eq!(outcome.error(), Some("input not found"));
    }

    #[test]
    fn wait_for_times_out_on_absent_selector() {
        let driver = FakeDriver::with_page(el("body"));
        let outcome = wait_for(&driver, &args(json!({"selector": "#late", "timeout": 50})));
        assert_eq!(outcome.error(), Some("timeout"));
        assert_eq!(outcome.str_field("selector"), Some("#late"));
    }

    #[test]
    fn wait_for_succeeds_on_visible_selector() {
        let driver = FakeDriver::with_page(el("body").child(el("div").id("panel").text("hi")));
        let outcome = wait_for(&driver, &args(json!({"selector": "#panel", "timeout": 50})));
        assert!(outcome.is_ok());
    }

    #[test]
    fn nav_reports_target_url_or_null() {
        let driver = FakeDriver::with_page(el("body"));
        let outcome = nav(&driver, &args(json!({"url": "https://x/y"})));
        assert_eq!(outcome.str_field("navigating"), Some("https://x/y"));
        assert_eq!(driver.state.lock().unwrap().navigations, vec!["https://x/y"]);

        let outcome = nav(&driver, &args(json!({})));
        assert!(outcome.is_ok());
        assert_eq!(outcome.0.get("navigating"), Some(&Value::Null));
    }

    #[test]
    fn wait_for_load_reports_state_without_failing() {
        let driver = FakeDriver::with_page(el("body"));
        driver.state.lock().unwrap().ready_state = "interactive".into();
        let outcome = wait_for_load(&driver, &args(json!({"timeout": 50})));
        assert!(outcome.is_ok());
        assert_eq!(outcome.str_field("state"), Some("interactive"));

        driver.state.lock().unwrap().ready_state = "complete".into();
        let outcome = wait_for_load(&driver, &args(json!({"timeout": 50})));
        assert_eq!(outcome.str_field("state"), Some("complete"));
    }

    #[test]
    fn idle_requires_two_stable_samples() {
        let driver = FakeDriver::with_page(el("body"));
        driver.state.lock().unwrap().body_len = 1234;
        let outcome = wait_for_idle(&driver, &args(json!({"quietMs": 50, "timeout": 500})));
        assert_eq!(outcome.0.get("idle"), Some(&Value::Bool(true)));
    }

    #[test]
    fn idle_times_out_softly_when_document_keeps_growing() {
        let driver = FakeDriver::with_page(el("body"));
        driver.state.lock().unwrap().grow_body = true;
        let outcome = wait_for_idle(&driver, &args(json!({"quietMs": 50, "timeout": 200})));
        assert!(outcome.is_ok());
        assert_eq!(outcome.0.get("idle"), Some(&Value::Bool(false)));
    }

    #[test]
    fn wait_clamps_seconds_to_sixty() {
        assert_eq!(clamp_wait_ms(Some(120), None), 60_000);
        assert_eq!(clamp_wait_ms(Some(2), None), 2_000);
        assert_eq!(clamp_wait_ms(None, Some(90_000)), 60_000);
        assert_eq!(clamp_wait_ms(Some(1), Some(2_500)), 2_500);
        assert_eq!(clamp_wait_ms(None, None), 0);
    }

    #[test]
    fn back_always_reports_navigating() {
        let driver = FakeDriver::with_page(el("body"));
        let outcome = back(&driver, &Map::new());
        assert!(outcome.signals_navigation());
        assert_eq!(driver.state.lock().unwrap().backs, 1);
    }

    #[test]
    fn poll_until_runs_probe_at_least_once() {
        let mut calls = 0;
        let result = poll_until(Duration::ZERO, Duration::from_millis(1), || {
            calls += 1;
            Some(calls)
        });
        assert_eq!(result, Ok(1));
    }
}
