//! HTTP client for the remote planning service: an opaque function from
//! {goal, page_state} to an ordered step list. The hint object rides along
//! for presentation subscribers and is never interpreted here.

use std::time::Duration;

use anyhow::{Result, anyhow};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::types::{ActionStep, PageState};

pub const DEFAULT_PLANNER_URL: &str = "http://127.0.0.1:8000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Serialize)]
struct PlanRequest<'a> {
    goal: &'a str,
    page_state: &'a PageState,
    current_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

/// The planner's answer: ordered steps plus an optional hint object
/// (`summary`, `expect_path`, `tts`) consumed only by presentation glue.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<ActionStep>,
    #[serde(default)]
    pub hint: Map<String, Value>,
}

impl Plan {
    pub fn summary(&self) -> Option<&str> {
        self.hint.get("summary").and_then(Value::as_str)
    }
}

pub struct PlannerClient {
    client: Client,
    base_url: String,
}

impl PlannerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        PlannerClient {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Ask for the next plan. Non-2xx responses and malformed bodies are
    /// errors for the goal loop to report; they never crash the bridge.
    pub async fn plan(
        &self,
        goal: &str,
        page_state: &PageState,
        thread_id: Option<&str>,
    ) -> Result<Plan> {
        let request = PlanRequest {
            goal,
            page_state,
            current_url: &page_state.url,
            thread_id,
        };
        let response = self
            .client
            .post(format!("{}/agent/run", self.base_url.trim_end_matches('/')))
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let detail = body["detail"]
                .as_str()
                .or_else(|| body["error"].as_str())
                .unwrap_or("unknown planner error");
            return Err(anyhow!("planner error ({status}): {detail}"));
        }

        let plan: Plan = serde_json::from_value(body)?;
        debug!(steps = plan.steps.len(), "plan received");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_parses_steps_and_hint() {
        let plan: Plan = serde_json::from_value(json!({
            "steps": [
                {"tool": "find", "args": {"query": "book"}},
                {"tool": "click", "args": {"selector": "#go"}},
                {"tool": "done", "args": {"reason": "booked"}}
            ],
            "hint": {"summary": "Booked the appointment", "tts": "Done"}
        }))
        .unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].tool, "find");
        assert!(plan.steps[2].is_terminal());
        assert_eq!(plan.summary(), Some("Booked the appointment"));
    }

    #[test]
    fn plan_tolerates_missing_fields() {
        let plan: Plan = serde_json::from_value(json!({})).unwrap();
        assert!(plan.steps.is_empty());
        assert!(plan.summary().is_none());
    }
}
