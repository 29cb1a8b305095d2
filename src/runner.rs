//! Replays an externally planned step list against the live page, one step
//! at a time, interpreting navigation side effects and re-synchronizing
//! state after every navigating step.

use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::server::BridgeEvent;
use crate::types::{ActionStep, PageState};

/// How long a post-step navigation may take before the runner moves on.
const NAV_LOAD_TIMEOUT_MS: u64 = 10_000;
/// Settle window after a navigation completes.
const NAV_IDLE_QUIET_MS: u64 = 400;
const NAV_IDLE_TIMEOUT_MS: u64 = 2_000;

/// Why a plan stopped, when it stopped on a terminal step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Done(String),
    Fail(String),
}

#[derive(Debug, Default)]
pub struct PlanReport {
    /// Steps actually dispatched (terminal steps are not dispatched).
    pub executed: usize,
    pub terminal: Option<Terminal>,
    /// Freshest snapshot taken during post-navigation re-sync, if any.
    pub last_page: Option<PageState>,
}

pub struct PlanRunner<'a> {
    bridge: &'a Bridge,
    events: &'a broadcast::Sender<BridgeEvent>,
}

impl<'a> PlanRunner<'a> {
    pub fn new(bridge: &'a Bridge, events: &'a broadcast::Sender<BridgeEvent>) -> Self {
        PlanRunner { bridge, events }
    }

    /// Execute the steps in order. Failures are data: a failed step is
    /// reported and the plan continues, except where the click→href
    /// fallback recovers it into a navigation.
    pub async fn run(&self, steps: &[ActionStep]) -> PlanReport {
        let mut report = PlanReport::default();
        // top find match carrying an href, remembered for click recovery
        let mut last_find_href: Option<String> = None;

        for (index, step) in steps.iter().enumerate() {
            if step.is_terminal() {
                let reason = step.reason().unwrap_or_default().to_string();
                report.terminal = Some(match step.tool.as_str() {
                    "fail" => Terminal::Fail(reason),
                    _ => Terminal::Done(reason),
                });
                break;
            }

            let envelope = self.bridge.dispatch_step(step).await;
            report.executed += 1;
            let outcome = crate::types::ActionOutcome::from_value(&envelope.data);
            let number = index + 1;
            if envelope.ok {
                info!(step = number, tool = %step.tool, "step ok");
                let _ = self.events.send(BridgeEvent::Step {
                    number,
                    tool: step.tool.clone(),
                    detail: Value::Object(step.args.clone()).to_string(),
                });
            } else {
                let message = outcome.error().unwrap_or("failed").to_string();
                warn!(step = number, tool = %step.tool, %message, "step failed");
                let _ = self.events.send(BridgeEvent::StepError {
                    tool: step.tool.clone(),
                    message,
                });
            }

            if step.tool == "find" {
                last_find_href = envelope.data["matches"][0]["href"]
                    .as_str()
                    .filter(|h| !h.is_empty())
                    .map(str::to_owned);
            }

            let mut navigated =
                outcome.signals_navigation() || matches!(step.tool.as_str(), "nav" | "goto" | "back");

            // Selector clicks on SPA-intercepted anchors frequently fail or
            // no-op; when a prior find already told us where the anchor
            // leads, navigate there directly.
            if step.tool == "click" && !navigated {
                let recoverable =
                    (!envelope.ok && outcome.error() == Some("element not found")) || envelope.ok;
                if recoverable {
                    if let Some(href) = last_find_href.clone() {
                        info!(%href, "click fallback: navigating to last find match");
                        let _ = self
                            .bridge
                            .dispatch_step(&ActionStep::new("nav", json!({"url": href})))
                            .await;
                        navigated = true;
                    }
                }
            }

            if navigated {
                self.resync(&mut report).await;
            }
        }
        report
    }

    /// After a navigating step: wait for the load, let the page settle, and
    /// re-snapshot. The injected collectors are stateless, so the fresh
    /// snapshot is what re-establishes the bridge's presence in the new
    /// page context.
    async fn resync(&self, report: &mut PlanReport) {
        let _ = self
            .bridge
            .dispatch_step(&ActionStep::new(
                "wait_for_load",
                json!({"timeout": NAV_LOAD_TIMEOUT_MS}),
            ))
            .await;
        let _ = self
            .bridge
            .dispatch_step(&ActionStep::new(
                "wait_for_idle",
                json!({"quietMs": NAV_IDLE_QUIET_MS, "timeout": NAV_IDLE_TIMEOUT_MS}),
            ))
            .await;
        match self.bridge.page_state().await {
            Ok(page) => {
                let _ = self.events.send(BridgeEvent::PageChanged { page: page.clone() });
                report.last_page = Some(page);
            }
            Err(e) => warn!(error = %format!("{e:#}"), "post-navigation snapshot failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeDriver, el};
    use std::sync::Arc;

    fn harness(driver: FakeDriver) -> (Bridge, broadcast::Sender<BridgeEvent>, Arc<FakeDriver>) {
        let driver = Arc::new(driver);
        // sends into a receiverless channel just return Err, which the
        // runner already ignores
        let (events, _) = broadcast::channel(64);
        (Bridge::new(driver.clone()), events, driver)
    }

    fn step(tool: &str, args: Value) -> ActionStep {
        ActionStep::new(tool, args)
    }

    #[tokio::test]
    async fn nav_then_done_runs_one_wait_cycle_and_stops() {
        let (bridge, events, driver) = harness(FakeDriver::with_page(el("body")));
        let runner = PlanRunner::new(&bridge, &events);
        let report = runner
            .run(&[
                step("nav", json!({"url": "https://x/y"})),
                step("done", json!({"reason": "arrived"})),
            ])
            .await;

        assert_eq!(report.executed, 1);
        assert_eq!(report.terminal, Some(Terminal::Done("arrived".into())));
        let state = driver.state.lock().unwrap();
        assert_eq!(state.navigations, vec!["https://x/y"]);
        // exactly one re-sync snapshot, none after termination
        assert_eq!(state.collects, 1);
    }

    #[tokio::test]
    async fn fail_step_is_terminal_without_dispatch() {
        let (bridge, events, driver) = harness(FakeDriver::with_page(el("body")));
        let runner = PlanRunner::new(&bridge, &events);
        let report = runner
            .run(&[step("fail", json!({"reason": "dead end"}))])
            .await;
        assert_eq!(report.executed, 0);
        assert_eq!(report.terminal, Some(Terminal::Fail("dead end".into())));
        assert_eq!(driver.state.lock().unwrap().collects, 0);
    }

    #[tokio::test]
    async fn missing_click_falls_back_to_found_href() {
        let (bridge, events, driver) = harness(FakeDriver::with_page(
            el("body").child(el("a").id("labs").text("Lab Results").attr("href", "/labs")),
        ));
        let runner = PlanRunner::new(&bridge, &events);
        let report = runner
            .run(&[
                step("find", json!({"query": "lab results"})),
                step("click", json!({"selector": "#stale-selector"})),
            ])
            .await;

        assert_eq!(report.executed, 2);
        assert_eq!(driver.state.lock().unwrap().navigations, vec!["/labs"]);
        assert!(report.last_page.is_some());
    }

    #[tokio::test]
    async fn anchor_click_triggers_resync_snapshot() {
        let (bridge, events, driver) = harness(FakeDriver::with_page(
            el("body").child(el("a").id("next").text("Next page").attr("href", "/next")),
        ));
        let runner = PlanRunner::new(&bridge, &events);
        let report = runner
            .run(&[step("click", json!({"selector": "#next"}))])
            .await;

        assert_eq!(report.executed, 1);
        assert!(report.terminal.is_none());
        let state = driver.state.lock().unwrap();
        // one collect for the re-sync snapshot; href fallback not involved
        assert_eq!(state.collects, 1);
        assert!(state.navigations.is_empty());
    }

    #[tokio::test]
    async fn non_navigating_plan_takes_no_snapshots() {
        let (bridge, events, driver) = harness(FakeDriver::with_page(
            el("body").child(el("input").id("q")),
        ));
        let runner = PlanRunner::new(&bridge, &events);
        let report = runner
            .run(&[step("type", json!({"selector": "#q", "text": "flu shot"}))])
            .await;
        assert_eq!(report.executed, 1);
        assert_eq!(driver.state.lock().unwrap().collects, 0);
        assert!(report.last_page.is_none());
    }
}
