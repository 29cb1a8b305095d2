//! The dispatch boundary between the orchestrator and the primitives.
//!
//! A [`Bridge`] instance owns the tool registry and the shared driver - no
//! ambient globals, so several page contexts can run independently in one
//! process. Dispatches are serialized by an async mutex: the live page is
//! the only shared mutable resource, and one request runs at a time.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::driver::PageDriver;
use crate::error::ActionError;
use crate::executor;
use crate::locator;
use crate::snapshot;
use crate::types::{ActionOutcome, ActionStep, FIND_DEFAULT_LIMIT, PageState};

type ToolFn = fn(&dyn PageDriver, &Map<String, Value>) -> ActionOutcome;

/// Normalized dispatch result: `ok` is false iff the primitive's own result
/// carried `ok: false`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub ok: bool,
    pub data: Value,
}

impl Envelope {
    fn from_outcome(outcome: ActionOutcome) -> Self {
        Envelope {
            ok: outcome.is_ok(),
            data: outcome.into_value(),
        }
    }

    fn failure(err: &ActionError) -> Self {
        Envelope::from_outcome(ActionOutcome::failure(err))
    }
}

pub struct Bridge {
    driver: Arc<dyn PageDriver>,
    tools: HashMap<&'static str, ToolFn>,
    /// Serializes all tool work against the one live page.
    gate: tokio::sync::Mutex<()>,
}

impl Bridge {
    pub fn new(driver: Arc<dyn PageDriver>) -> Self {
        let mut tools: HashMap<&'static str, ToolFn> = HashMap::new();
        tools.insert("snapshot", tool_snapshot);
        tools.insert("get_page_state", tool_snapshot);
        tools.insert("find", tool_find);
        tools.insert("click", executor::click);
        tools.insert("type", executor::type_text);
        tools.insert("wait_for", executor::wait_for);
        tools.insert("nav", executor::nav);
        tools.insert("goto", executor::nav);
        tools.insert("wait_for_load", executor::wait_for_load);
        tools.insert("wait_for_idle", executor::wait_for_idle);
        tools.insert("back", executor::back);
        tools.insert("wait", executor::wait);
        Bridge {
            driver,
            tools,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Handle one raw request envelope (`{tool, args}`).
    pub async fn dispatch(&self, request: Value) -> Envelope {
        let Value::Object(request) = request else {
            return Envelope::failure(&ActionError::BadRequest);
        };
        let Some(tool) = request.get("tool").and_then(Value::as_str).filter(|t| !t.is_empty())
        else {
            return Envelope::failure(&ActionError::BadRequest);
        };
        let args = match request.get("args") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => return Envelope::failure(&ActionError::BadRequest),
        };
        self.run(tool, args).await
    }

    /// Execute one planned step.
    pub async fn dispatch_step(&self, step: &ActionStep) -> Envelope {
        self.run(&step.tool, step.args.clone()).await
    }

    async fn run(&self, tool: &str, args: Map<String, Value>) -> Envelope {
        let Some(&handler) = self.tools.get(tool) else {
            debug!(tool, "unknown tool");
            return Envelope::failure(&ActionError::UnknownTool);
        };
        let _serialized = self.gate.lock().await;
        let driver = self.driver.clone();
        let joined =
            tokio::task::spawn_blocking(move || handler(driver.as_ref(), &args)).await;
        match joined {
            Ok(outcome) => Envelope::from_outcome(outcome),
            // the fault barrier: a panicking primitive must never take the
            // message loop down with it
            Err(join_err) => {
                error!(tool, error = %join_err, "primitive panicked");
                Envelope::failure(&ActionError::Unexpected(join_err.to_string()))
            }
        }
    }

    /// Take a fresh snapshot and return it typed.
    pub async fn page_state(&self) -> Result<PageState> {
        let envelope = self.run("snapshot", Map::new()).await;
        if !envelope.ok {
            let reason = envelope
                .data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("snapshot failed");
            return Err(anyhow!("{reason}"));
        }
        serde_json::from_value(envelope.data).context("malformed snapshot payload")
    }
}

fn tool_snapshot(driver: &dyn PageDriver, _args: &Map<String, Value>) -> ActionOutcome {
    let page = (|| -> Result<PageState> {
        let tree = driver.collect()?;
        let url = driver.url().unwrap_or_default();
        let title = driver.title().unwrap_or_default();
        Ok(snapshot::snapshot(&tree, &url, &title))
    })();
    match page {
        Ok(page) => match serde_json::to_value(&page) {
            Ok(Value::Object(map)) => ActionOutcome(map),
            _ => ActionOutcome::failure(&ActionError::Unexpected("snapshot serialization".into())),
        },
        Err(e) => ActionOutcome::failure(&ActionError::unexpected(&e)),
    }
}

fn tool_find(driver: &dyn PageDriver, args: &Map<String, Value>) -> ActionOutcome {
    let Some(query) = args.get("query").and_then(Value::as_str) else {
        return ActionOutcome::failure(&ActionError::BadRequest);
    };
    let max = args
        .get("max")
        .and_then(Value::as_u64)
        .map(|m| m as usize)
        .unwrap_or(FIND_DEFAULT_LIMIT);
    let tree = match driver.collect() {
        Ok(tree) => tree,
        Err(e) => return ActionOutcome::failure(&ActionError::unexpected(&e)),
    };
    let result = locator::find(&tree, query, max);
    ActionOutcome::success()
        .with(
            "matches",
            serde_json::to_value(&result.matches).unwrap_or(Value::Array(Vec::new())),
        )
        .with("total", result.total as u64)
}
