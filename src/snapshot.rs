//! Category extraction rules turning a collected DOM tree into a
//! [`PageState`].
//!
//! The snapshot is a lossy, intentionally narrow projection: the consumer is
//! a language-model planner with a finite context budget, so every category
//! is capped, text is bounded, and duplicates collapse by a per-category
//! signature. Raw markup never enters the payload.

use std::collections::HashSet;

use crate::dom::{DomTree, ElementNode, NodeId, build_path, is_visible};
use crate::types::{ElementSummary, PageState};

pub const BUTTONS_CAP: usize = 400;
pub const LINKS_CAP: usize = 400;
pub const INPUTS_CAP: usize = 200;
pub const HEADINGS_CAP: usize = 50;
pub const TEXTS_CAP: usize = 300;
pub const NAV_LINKS_CAP: usize = 200;
pub const BREADCRUMBS_CAP: usize = 20;

/// Text bound for interactive labels (buttons, links, nav, breadcrumbs).
pub const LABEL_TEXT_MAX: usize = 80;
/// Text bound for headings and the short-text category.
pub const TEXT_MAX: usize = 120;

/// Collapse internal whitespace and truncate to `max` characters.
pub fn tidy_text(raw: &str, max: usize) -> String {
    let collapsed: Vec<&str> = raw.split_whitespace().collect();
    collapsed.join(" ").chars().take(max).collect()
}

/// Summarize the page into capped, de-duplicated categories. Re-running on
/// an unchanged tree yields a structurally identical, order-preserving
/// result.
pub fn snapshot(tree: &DomTree, url: &str, title: &str) -> PageState {
    PageState {
        url: url.to_string(),
        title: title.to_string(),
        buttons: buttons(tree),
        links: links(tree),
        inputs: inputs(tree),
        headings: headings(tree),
        nav_links: nav_links(tree),
        breadcrumbs: breadcrumbs(tree),
        texts: texts(tree),
    }
}

/// `a`, `button`, `[role=button]` - the clickable vocabulary shared with the
/// locator and the click fallback search.
pub fn is_button_like(node: &ElementNode) -> bool {
    node.tag == "a" || node.tag == "button" || node.role() == Some("button")
}

fn is_link(node: &ElementNode) -> bool {
    node.tag == "a" && node.href().is_some_and(|h| !h.is_empty())
}

fn is_input(node: &ElementNode) -> bool {
    matches!(node.tag.as_str(), "input" | "textarea" | "select")
}

fn is_heading(node: &ElementNode) -> bool {
    node.tag == "h1" || node.tag == "h2" || node.role() == Some("heading")
}

fn is_short_text(node: &ElementNode) -> bool {
    matches!(
        node.tag.as_str(),
        "span" | "div" | "p" | "h1" | "h2" | "h3"
    )
}

fn under_nav(tree: &DomTree, id: NodeId) -> bool {
    tree.ancestors(id)
        .any(|a| a.tag == "nav" || a.role() == Some("navigation"))
}

fn under_breadcrumb(tree: &DomTree, id: NodeId) -> bool {
    tree.ancestors(id).any(|a| {
        a.attr("aria-label")
            .is_some_and(|v| v.to_ascii_lowercase().contains("breadcrumb"))
    })
}

/// The shared per-category pipeline: select in document order, take at most
/// the cap, keep visible nodes, map to summaries (dropping entries missing
/// required fields), de-duplicate by signature, re-apply the cap.
fn extract(
    tree: &DomTree,
    cap: usize,
    select: impl Fn(&DomTree, NodeId, &ElementNode) -> bool,
    map: impl Fn(&DomTree, NodeId, &ElementNode) -> Option<ElementSummary>,
    signature: impl Fn(&ElementSummary) -> String,
) -> Vec<ElementSummary> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let candidates = tree
        .iter()
        .filter(|&(id, node)| select(tree, id, node))
        .take(cap);
    for (id, node) in candidates {
        if !is_visible(node) {
            continue;
        }
        let Some(summary) = map(tree, id, node) else {
            continue;
        };
        if seen.insert(signature(&summary)) {
            out.push(summary);
        }
    }
    out.truncate(cap);
    out
}

fn buttons(tree: &DomTree) -> Vec<ElementSummary> {
    extract(
        tree,
        BUTTONS_CAP,
        |_, _, n| is_button_like(n),
        |tree, id, n| {
            let text = tidy_text(&n.text, LABEL_TEXT_MAX);
            let selector = build_path(tree, id)?;
            if text.is_empty() {
                return None;
            }
            Some(ElementSummary {
                text,
                selector,
                href: n.href().map(str::to_owned),
                aria_label: n.attr("aria-label").map(str::to_owned),
                ..Default::default()
            })
        },
        |s| format!("{}|{}", s.text, s.selector),
    )
}

fn links(tree: &DomTree) -> Vec<ElementSummary> {
    extract(
        tree,
        LINKS_CAP,
        |_, _, n| is_link(n),
        link_summary,
        |s| format!("{}|{}", s.text, s.href.as_deref().unwrap_or_default()),
    )
}

fn link_summary(tree: &DomTree, id: NodeId, n: &ElementNode) -> Option<ElementSummary> {
    let selector = build_path(tree, id)?;
    let href = n.href().filter(|h| !h.is_empty())?.to_owned();
    Some(ElementSummary {
        text: tidy_text(&n.text, LABEL_TEXT_MAX),
        selector,
        href: Some(href),
        ..Default::default()
    })
}

fn inputs(tree: &DomTree) -> Vec<ElementSummary> {
    extract(
        tree,
        INPUTS_CAP,
        |_, _, n| is_input(n),
        |tree, id, n| {
            let selector = build_path(tree, id)?;
            Some(ElementSummary {
                text: String::new(),
                selector,
                name: n.attr("name").map(str::to_owned),
                placeholder: n.attr("placeholder").map(str::to_owned),
                aria_label: n.attr("aria-label").map(str::to_owned),
                ..Default::default()
            })
        },
        |s| s.selector.clone(),
    )
}

fn headings(tree: &DomTree) -> Vec<ElementSummary> {
    extract(
        tree,
        HEADINGS_CAP,
        |_, _, n| is_heading(n),
        |tree, id, n| {
            let text = tidy_text(&n.text, TEXT_MAX);
            let selector = build_path(tree, id)?;
            if text.is_empty() {
                return None;
            }
            Some(ElementSummary {
                text,
                selector,
                ..Default::default()
            })
        },
        |s| format!("{}|{}", s.text, s.selector),
    )
}

fn nav_links(tree: &DomTree) -> Vec<ElementSummary> {
    extract(
        tree,
        NAV_LINKS_CAP,
        |tree, id, n| is_link(n) && under_nav(tree, id),
        link_summary,
        |s| format!("{}|{}", s.text, s.href.as_deref().unwrap_or_default()),
    )
}

fn breadcrumbs(tree: &DomTree) -> Vec<ElementSummary> {
    extract(
        tree,
        BREADCRUMBS_CAP,
        |tree, id, n| is_link(n) && under_breadcrumb(tree, id),
        link_summary,
        |s| format!("{}|{}", s.text, s.href.as_deref().unwrap_or_default()),
    )
}

fn texts(tree: &DomTree) -> Vec<ElementSummary> {
    extract(
        tree,
        TEXTS_CAP,
        |_, _, n| is_short_text(n),
        |_, _, n| {
            // short labels only: anything longer than the bound is a
            // container, not a label, and is dropped rather than truncated
            let text = tidy_text(&n.text, TEXT_MAX + 1);
            if text.is_empty() || text.chars().count() > TEXT_MAX {
                return None;
            }
            Some(ElementSummary {
                text,
                ..Default::default()
            })
        },
        |s| s.text.to_lowercase(),
    )
}
