//! The live end of the bridge: a persistent Chrome session plus a
//! [`PageDriver`] that reaches the page through small injected JavaScript
//! programs evaluated per call. Each program is stateless; arguments are
//! JSON-embedded, never spliced into the source as raw strings.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tracing::{info, warn};

use crate::dom::{DomTree, ElementNode, RawNode};
use crate::driver::PageDriver;

/// How the browser session is established.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Devtools endpoint to attach to before launching a fresh browser.
    pub attach_url: String,
    pub headless: bool,
    /// Persistent profile directory; a per-user default is derived when
    /// absent.
    pub profile_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            attach_url: "http://127.0.0.1:9222".into(),
            headless: false,
            profile_dir: None,
        }
    }
}

/// Persistent browser session. Created once, reused for every goal.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch(cfg: &SessionConfig) -> Result<Self> {
        // Attach mode first: reuse a Chrome the user already has open.
        if let Ok(browser) = Browser::connect(cfg.attach_url.clone()) {
            info!(endpoint = %cfg.attach_url, "attached to running Chrome");
            let tab = {
                let tabs_lock = browser.get_tabs();
                let tabs = tabs_lock.lock().unwrap();
                match tabs.first() {
                    Some(tab) => tab.clone(),
                    None => browser.new_tab()?,
                }
            };
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        let profile = match &cfg.profile_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("pagebridge")
                .join("profile"),
        };
        std::fs::create_dir_all(&profile)
            .with_context(|| format!("creating profile dir {}", profile.display()))?;

        let options = LaunchOptions {
            headless: cfg.headless,
            user_data_dir: Some(profile),
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
                std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
                std::ffi::OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless = cfg.headless, "launching Chrome");
        let browser = Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

/// Walks the live DOM from the body to a bounded depth and serializes every
/// element: tag, id, collapsed text slice, the attribute subset the
/// classifier needs, computed-style flags, and the bounding rect. All
/// element children are kept so `nth-child` indices stay faithful.
const COLLECT_JS: &str = r#"
(() => {
  const ATTRS = ['href','name','placeholder','type','role','title','value',
                 'aria-label','aria-hidden','aria-disabled','disabled','hidden'];
  const MAX_DEPTH = 20;
  function pack(el, depth) {
    const attrs = {};
    for (const k of ATTRS) {
      const v = el.getAttribute(k);
      if (v !== null) attrs[k] = v;
    }
    const cs = getComputedStyle(el);
    const op = parseFloat(cs.opacity);
    const r = el.getBoundingClientRect();
    const node = {
      tag: el.tagName.toLowerCase(),
      id: el.id || '',
      text: (el.textContent || '').replace(/\s+/g, ' ').trim().slice(0, 200),
      attrs,
      style: { display: cs.display, visibility: cs.visibility, opacity: isNaN(op) ? 1 : op },
      rect: { x: r.x, y: r.y, w: r.width, h: r.height },
      children: [],
    };
    if (depth < MAX_DEPTH) {
      for (const child of el.children) node.children.push(pack(child, depth + 1));
    }
    return node;
  }
  return JSON.stringify(document.body ? pack(document.body, 0) : null);
})()
"#;

const PROBE_FN: &str = r#"
(sel) => {
  const el = document.querySelector(sel);
  if (!el) return JSON.stringify(null);
  const ATTRS = ['href','name','placeholder','type','role','title','value',
                 'aria-label','aria-hidden','aria-disabled','disabled','hidden'];
  const attrs = {};
  for (const k of ATTRS) {
    const v = el.getAttribute(k);
    if (v !== null) attrs[k] = v;
  }
  const cs = getComputedStyle(el);
  const op = parseFloat(cs.opacity);
  const r = el.getBoundingClientRect();
  return JSON.stringify({
    tag: el.tagName.toLowerCase(),
    id: el.id || '',
    text: (el.textContent || '').replace(/\s+/g, ' ').trim().slice(0, 200),
    attrs,
    style: { display: cs.display, visibility: cs.visibility, opacity: isNaN(op) ? 1 : op },
    rect: { x: r.x, y: r.y, w: r.width, h: r.height },
  });
}
"#;

const SCROLL_FN: &str = r#"
(sel) => {
  const el = document.querySelector(sel);
  if (el && el.scrollIntoView) el.scrollIntoView({ block: 'center', inline: 'nearest' });
  return true;
}
"#;

const FIRE_MOUSE_FN: &str = r#"
(sel, kind, x, y) => {
  const el = document.querySelector(sel);
  if (!el) return false;
  el.dispatchEvent(new MouseEvent(kind, {
    bubbles: true, cancelable: true, view: window, clientX: x, clientY: y,
  }));
  return true;
}
"#;

const NATIVE_CLICK_FN: &str = r#"
(sel) => {
  const el = document.querySelector(sel);
  if (!el) return false;
  el.click();
  return true;
}
"#;

const FOCUS_FN: &str = r#"
(sel) => {
  const el = document.querySelector(sel);
  if (!el) return false;
  el.focus();
  return true;
}
"#;

const SET_VALUE_FN: &str = r#"
(sel, value) => {
  const el = document.querySelector(sel);
  if (!el) return false;
  el.value = value;
  return true;
}
"#;

const FIRE_FN: &str = r#"
(sel, kind) => {
  const el = document.querySelector(sel);
  if (!el) return false;
  el.dispatchEvent(new Event(kind, { bubbles: true }));
  return true;
}
"#;

/// [`PageDriver`] over one Chrome tab.
pub struct ChromeDriver {
    tab: Arc<Tab>,
}

impl ChromeDriver {
    pub fn new(tab: Arc<Tab>) -> Self {
        ChromeDriver { tab }
    }

    fn eval(&self, expression: &str) -> Result<Option<Value>> {
        let result = self
            .tab
            .evaluate(expression, false)
            .map_err(|e| anyhow!("evaluate failed: {e}"))?;
        Ok(result.value)
    }

    fn eval_string(&self, expression: &str) -> Result<String> {
        Ok(self
            .eval(expression)?
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }

    /// Apply an injected function to JSON-embedded arguments.
    fn call(&self, function: &str, args: &[Value]) -> Result<Option<Value>> {
        let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
        self.eval(&format!("({})({})", function.trim(), rendered.join(",")))
    }

    /// Call an injected function whose result reports whether the selector
    /// still resolved.
    fn call_on(&self, function: &str, selector: &str, extra: &[Value]) -> Result<()> {
        let mut args = vec![Value::String(selector.to_string())];
        args.extend_from_slice(extra);
        match self.call(function, &args)? {
            Some(Value::Bool(true)) => Ok(()),
            _ => Err(anyhow!("selector {selector} no longer resolves")),
        }
    }
}

impl PageDriver for ChromeDriver {
    fn url(&self) -> Result<String> {
        self.eval_string("window.location.href")
    }

    fn title(&self) -> Result<String> {
        self.eval_string("document.title")
    }

    fn collect(&self) -> Result<DomTree> {
        let payload = self.eval_string(COLLECT_JS)?;
        if payload.is_empty() || payload == "null" {
            warn!("collector returned no body; treating page as empty");
            return Ok(DomTree::default());
        }
        DomTree::from_json(&payload).context("malformed collector payload")
    }

    fn probe(&self, selector: &str) -> Result<Option<ElementNode>> {
        let payload = self
            .call(PROBE_FN, &[Value::String(selector.to_string())])?
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        if payload.is_empty() || payload == "null" {
            return Ok(None);
        }
        let raw: RawNode = serde_json::from_str(&payload).context("malformed probe payload")?;
        Ok(Some(ElementNode::from_raw(raw)))
    }

    fn scroll_into_view(&self, selector: &str) -> Result<()> {
        self.call(SCROLL_FN, &[Value::String(selector.to_string())])?;
        Ok(())
    }

    fn fire_mouse(&self, selector: &str, kind: &str, x: f64, y: f64) -> Result<()> {
        self.call_on(
            FIRE_MOUSE_FN,
            selector,
            &[Value::String(kind.to_string()), x.into(), y.into()],
        )
    }

    fn native_click(&self, selector: &str) -> Result<()> {
        self.call_on(NATIVE_CLICK_FN, selector, &[])
    }

    fn focus(&self, selector: &str) -> Result<()> {
        self.call_on(FOCUS_FN, selector, &[])
    }

    fn set_value(&self, selector: &str, value: &str) -> Result<()> {
        self.call_on(SET_VALUE_FN, selector, &[Value::String(value.to_string())])
    }

    fn fire(&self, selector: &str, event: &str) -> Result<()> {
        self.call_on(FIRE_FN, selector, &[Value::String(event.to_string())])
    }

    fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| anyhow!("navigation to {url} failed: {e}"))?;
        Ok(())
    }

    fn back(&self) -> Result<()> {
        self.eval("history.back()")?;
        Ok(())
    }

    fn ready_state(&self) -> Result<String> {
        self.eval_string("document.readyState")
    }

    fn body_length(&self) -> Result<u64> {
        Ok(self
            .eval("(document.body && document.body.innerHTML.length) || 0")?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }
}
