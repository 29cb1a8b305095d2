use anyhow::Result;

use crate::dom::{DomTree, ElementNode};

/// The seam between the pure snapshot/locator/executor core and a live
/// page. The production implementation drives a Chrome tab through injected
/// JavaScript ([`crate::chrome::ChromeDriver`]); tests substitute an
/// in-memory fake.
///
/// All methods are blocking; callers invoke them from a blocking thread.
/// The fine-grained event methods exist so the synthetic event *sequences*
/// (mousemove→mousedown→mouseup, clear→input→set→input→change) are owned
/// and tested in the executor, not hidden inside each driver.
pub trait PageDriver: Send + Sync {
    fn url(&self) -> Result<String>;
    fn title(&self) -> Result<String>;

    /// Collect the current element tree, bounded in depth and per-node text.
    fn collect(&self) -> Result<DomTree>;

    /// Re-resolve a selector against the live page and return its current
    /// state, or `None` when nothing matches. This is the re-resolution
    /// step behind the liveness assumption.
    fn probe(&self, selector: &str) -> Result<Option<ElementNode>>;

    fn scroll_into_view(&self, selector: &str) -> Result<()>;

    /// Dispatch one synthetic mouse event at page coordinates.
    fn fire_mouse(&self, selector: &str, kind: &str, x: f64, y: f64) -> Result<()>;

    /// Invoke the element's native click.
    fn native_click(&self, selector: &str) -> Result<()>;

    fn focus(&self, selector: &str) -> Result<()>;

    /// Set the element's value without firing any event.
    fn set_value(&self, selector: &str, value: &str) -> Result<()>;

    /// Dispatch one synthetic bubbling event (`input`, `change`, ...).
    fn fire(&self, selector: &str, event: &str) -> Result<()>;

    fn navigate(&self, url: &str) -> Result<()>;
    fn back(&self) -> Result<()>;

    fn ready_state(&self) -> Result<String>;

    /// Cheap document-size proxy (serialized body length) for the idle
    /// heuristic.
    fn body_length(&self) -> Result<u64>;
}
