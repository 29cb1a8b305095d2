use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pagebridge::bridge::Bridge;
use pagebridge::chrome::{BrowserSession, ChromeDriver, SessionConfig};
use pagebridge::planner::{DEFAULT_PLANNER_URL, PlannerClient};
use pagebridge::runner::{PlanRunner, Terminal};
use pagebridge::server::{self, BridgeEvent};
use pagebridge::types::MAX_TURNS_PER_GOAL;

/// Browser-automation bridge: snapshots a live Chrome tab, relays goals to
/// a remote planner and replays the returned action plan.
#[derive(Parser, Debug)]
#[command(name = "pagebridge", version, about)]
struct Args {
    /// Preferred channel-server port; the next nine are tried when taken.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Planner base URL; falls back to $PLANNER_URL.
    #[arg(long)]
    planner_url: Option<String>,

    /// Devtools endpoint to attach to before launching a fresh Chrome.
    #[arg(long, default_value = "http://127.0.0.1:9222")]
    attach_url: String,

    #[arg(long)]
    headless: bool,

    /// Persistent Chrome profile directory.
    #[arg(long)]
    profile_dir: Option<PathBuf>,

    /// Plan/execute turns allowed per goal.
    #[arg(long, default_value_t = MAX_TURNS_PER_GOAL)]
    max_turns: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pagebridge=info")),
        )
        .init();

    let args = Args::parse();
    let planner_url = args
        .planner_url
        .clone()
        .or_else(|| std::env::var("PLANNER_URL").ok())
        .unwrap_or_else(|| DEFAULT_PLANNER_URL.to_string());

    let cfg = SessionConfig {
        attach_url: args.attach_url.clone(),
        headless: args.headless,
        profile_dir: args.profile_dir.clone(),
    };
    let session = tokio::task::spawn_blocking(move || BrowserSession::launch(&cfg))
        .await
        .map_err(|e| anyhow::anyhow!("browser launch panicked: {e}"))??;

    let driver = Arc::new(ChromeDriver::new(session.tab.clone()));
    let bridge = Arc::new(Bridge::new(driver));
    let (mut goal_rx, event_tx) = server::start(args.port, bridge.clone()).await?;
    let planner = PlannerClient::new(planner_url);

    info!("bridge ready; POST goals to /goal, tools to /dispatch");
    while let Some(goal) = goal_rx.recv().await {
        run_goal(&bridge, &planner, &event_tx, &goal, args.max_turns).await;
        let _ = event_tx.send(BridgeEvent::Ready);
    }

    // the session owns the browser process; keep it alive until the goal
    // channel closes
    drop(session);
    Ok(())
}

/// One goal: alternate planning and replay until a terminal step or the
/// turn budget runs out.
async fn run_goal(
    bridge: &Bridge,
    planner: &PlannerClient,
    events: &broadcast::Sender<BridgeEvent>,
    goal: &str,
    max_turns: usize,
) {
    info!(goal, "starting goal");
    let mut page = match bridge.page_state().await {
        Ok(page) => page,
        Err(e) => {
            let _ = events.send(BridgeEvent::TaskError {
                message: format!("snapshot failed: {e:#}"),
            });
            return;
        }
    };

    for turn in 1..=max_turns {
        let _ = events.send(BridgeEvent::Planning);
        let plan = match planner.plan(goal, &page, None).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(turn, error = %format!("{e:#}"), "planner call failed");
                let _ = events.send(BridgeEvent::TaskError {
                    message: format!("{e:#}"),
                });
                return;
            }
        };
        if plan.steps.is_empty() {
            let message = plan
                .summary()
                .map(str::to_owned)
                .unwrap_or_else(|| "planner returned no steps".to_string());
            let _ = events.send(BridgeEvent::TaskError { message });
            return;
        }

        let report = PlanRunner::new(bridge, events).run(&plan.steps).await;
        match report.terminal {
            Some(Terminal::Done(reason)) => {
                let summary = if reason.is_empty() {
                    plan.summary().unwrap_or("goal complete").to_string()
                } else {
                    reason
                };
                info!(turn, %summary, "goal complete");
                let _ = events.send(BridgeEvent::TaskComplete { summary });
                return;
            }
            Some(Terminal::Fail(reason)) => {
                let message = if reason.is_empty() {
                    "planner gave up".to_string()
                } else {
                    reason
                };
                let _ = events.send(BridgeEvent::TaskError { message });
                return;
            }
            None => {
                page = match report.last_page {
                    Some(page) => page,
                    None => match bridge.page_state().await {
                        Ok(fresh) => fresh,
                        Err(e) => {
                            warn!(error = %format!("{e:#}"), "re-snapshot failed, reusing last page");
                            page
                        }
                    },
                };
            }
        }
    }

    let _ = events.send(BridgeEvent::TaskError {
        message: format!("turn budget exhausted ({max_turns})"),
    });
}
