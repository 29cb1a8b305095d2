use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ActionError;

/// How many plan/execute turns a single goal may consume before the loop
/// gives up, even if the planner never emits a terminal step.
pub const MAX_TURNS_PER_GOAL: usize = 10;

/// Default number of matches `find` returns when the caller gives no `max`.
pub const FIND_DEFAULT_LIMIT: usize = 6;

/// A disconnected description of one page element. Holds no live reference;
/// the `selector` must re-resolve to the same element at action time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSummary {
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(
        default,
        rename = "ariaLabel",
        skip_serializing_if = "Option::is_none"
    )]
    pub aria_label: Option<String>,
}

/// The bounded, categorized, de-duplicated structural summary of a page.
/// Built fresh on every snapshot and discarded after transmission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub buttons: Vec<ElementSummary>,
    pub links: Vec<ElementSummary>,
    pub inputs: Vec<ElementSummary>,
    pub headings: Vec<ElementSummary>,
    pub nav_links: Vec<ElementSummary>,
    pub breadcrumbs: Vec<ElementSummary>,
    pub texts: Vec<ElementSummary>,
}

/// One externally planned unit of work. Opaque beyond the tool name;
/// `done` and `fail` are terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ActionStep {
    pub fn new(tool: &str, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            tool: tool.to_string(),
            args,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.tool == "done" || self.tool == "fail"
    }

    /// Terminal reason supplied by the planner, if any.
    pub fn reason(&self) -> Option<&str> {
        self.args.get("reason").and_then(Value::as_str)
    }
}

/// The uniform result envelope every action primitive returns.
///
/// The wire contract is an open JSON object: `ok: bool` plus tool-specific
/// fields (`selector`, `href`, `navigate_to`, `navigating`, `error`,
/// `typed`, `waited`, `state`, `idle`). An absent `ok` means success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionOutcome(pub Map<String, Value>);

impl ActionOutcome {
    pub fn success() -> Self {
        let mut map = Map::new();
        map.insert("ok".into(), Value::Bool(true));
        ActionOutcome(map)
    }

    pub fn failure(err: &ActionError) -> Self {
        let mut map = Map::new();
        map.insert("ok".into(), Value::Bool(false));
        map.insert("error".into(), Value::String(err.to_string()));
        ActionOutcome(map)
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => ActionOutcome(map.clone()),
            _ => ActionOutcome(Map::new()),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Insert the field only when a value is present.
    pub fn maybe(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    /// A result without an inner `ok` flag counts as success.
    pub fn is_ok(&self) -> bool {
        !matches!(self.0.get("ok"), Some(Value::Bool(false)))
    }

    pub fn error(&self) -> Option<&str> {
        self.0.get("error").and_then(Value::as_str)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Whether this outcome signals a page navigation the runner must wait
    /// out: a truthy `navigating` flag or any href-like field.
    pub fn signals_navigation(&self) -> bool {
        match self.0.get("navigating") {
            Some(Value::Bool(true)) => return true,
            Some(Value::String(url)) if !url.is_empty() => return true,
            _ => {}
        }
        self.str_field("navigate_to").is_some_and(|u| !u.is_empty())
            || self.str_field("href").is_some_and(|u| !u.is_empty())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_without_ok_flag_counts_as_success() {
        let outcome = ActionOutcome::from_value(&json!({"navigating": "https://x/y"}));
        assert!(outcome.is_ok());
        assert!(outcome.signals_navigation());
    }

    #[test]
    fn failure_carries_error_string() {
        let outcome = ActionOutcome::failure(&ActionError::NotFound).with("selector", "#a");
        assert!(!outcome.is_ok());
        assert_eq!(outcome.error(), Some("element not found"));
        assert_eq!(outcome.str_field("selector"), Some("#a"));
    }

    #[test]
    fn navigation_signal_covers_flag_and_href_fields() {
        assert!(ActionOutcome::success().with("navigating", true).signals_navigation());
        assert!(ActionOutcome::success().with("href", "/next").signals_navigation());
        assert!(!ActionOutcome::success().with("navigating", false).signals_navigation());
        assert!(!ActionOutcome::success().signals_navigation());
    }

    #[test]
    fn element_summary_uses_camel_case_aria_label() {
        let summary = ElementSummary {
            text: "Pay".into(),
            selector: "#pay".into(),
            aria_label: Some("Pay now".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["ariaLabel"], "Pay now");
        assert!(value.get("href").is_none());
    }

    #[test]
    fn terminal_steps_and_reasons() {
        let done = ActionStep::new("done", json!({"reason": "booked"}));
        assert!(done.is_terminal());
        assert_eq!(done.reason(), Some("booked"));
        assert!(!ActionStep::new("click", json!({})).is_terminal());
    }
}
