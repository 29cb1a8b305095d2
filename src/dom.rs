use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Below this width or height an element is treated as decorative/offscreen
/// rather than a real control.
pub const MIN_VISIBLE_PX: f64 = 2.0;

/// Structural paths stop after this many `tag:nth-child(k)` segments.
pub const MAX_PATH_SEGMENTS: usize = 6;

/// One element as emitted by a DOM collector (the injected page walker, or a
/// test fixture). Nested; flattened into a [`DomTree`] before use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNode {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attrs: HashMap<String, String>,
    #[serde(default)]
    pub style: Option<StyleFlags>,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub children: Vec<RawNode>,
}

/// The computed-style subset visibility classification needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleFlags {
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default = "opaque")]
    pub opacity: f64,
}

fn opaque() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Rect {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub w: f64,
    #[serde(default)]
    pub h: f64,
}

pub type NodeId = usize;

/// A flattened element node. `child_slot` is the 1-based position among the
/// parent's element children, which is exactly what `:nth-child` counts.
#[derive(Debug, Clone)]
pub struct ElementNode {
    pub tag: String,
    pub id: String,
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub style: Option<StyleFlags>,
    pub rect: Option<Rect>,
    pub parent: Option<NodeId>,
    pub child_slot: usize,
}

impl ElementNode {
    pub fn from_raw(raw: RawNode) -> Self {
        ElementNode {
            tag: raw.tag.to_ascii_lowercase(),
            id: raw.id,
            text: raw.text,
            attrs: raw.attrs,
            style: raw.style,
            rect: raw.rect,
            parent: None,
            child_slot: 1,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// `disabled` attribute presence or `aria-disabled="true"`.
    pub fn is_disabled(&self) -> bool {
        self.attrs.contains_key("disabled") || self.attr("aria-disabled") == Some("true")
    }

    pub fn role(&self) -> Option<&str> {
        self.attr("role")
    }

    pub fn href(&self) -> Option<&str> {
        self.attr("href")
    }
}

/// Whether an element is worth showing to the planner and safe to interact
/// with. Fails open when style or rect data is unavailable, so a partial
/// collection never over-prunes.
pub fn is_visible(node: &ElementNode) -> bool {
    if node.attrs.contains_key("hidden") || node.attr("aria-hidden") == Some("true") {
        return false;
    }
    if node.is_disabled() {
        return false;
    }
    if let Some(style) = &node.style {
        if style.display == "none" || style.visibility == "hidden" || style.opacity < 0.01 {
            return false;
        }
    }
    if let Some(rect) = &node.rect {
        if rect.w < MIN_VISIBLE_PX || rect.h < MIN_VISIBLE_PX {
            return false;
        }
    }
    true
}

/// Arena of elements in document (pre-)order.
#[derive(Debug, Clone, Default)]
pub struct DomTree {
    nodes: Vec<ElementNode>,
}

impl DomTree {
    pub fn from_root(root: RawNode) -> Self {
        let mut nodes = Vec::new();
        flatten(root, None, 1, &mut nodes);
        DomTree { nodes }
    }

    /// Parse a collector's JSON payload (the serialized root element).
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        let root: RawNode = serde_json::from_str(payload)?;
        Ok(Self::from_root(root))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&ElementNode> {
        self.nodes.get(id)
    }

    /// All elements in document order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ElementNode)> {
        self.nodes.iter().enumerate()
    }

    /// Walk from the node's parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = &ElementNode> {
        let mut cur = self.nodes.get(id).and_then(|n| n.parent);
        std::iter::from_fn(move || {
            let idx = cur?;
            let node = &self.nodes[idx];
            cur = node.parent;
            Some(node)
        })
    }
}

fn flatten(raw: RawNode, parent: Option<NodeId>, slot: usize, nodes: &mut Vec<ElementNode>) {
    let RawNode {
        tag,
        id,
        text,
        attrs,
        style,
        rect,
        children,
    } = raw;
    let idx = nodes.len();
    nodes.push(ElementNode {
        tag: tag.to_ascii_lowercase(),
        id,
        text,
        attrs,
        style,
        rect,
        parent,
        child_slot: slot,
    });
    for (i, child) in children.into_iter().enumerate() {
        flatten(child, Some(idx), i + 1, nodes);
    }
}

/// Compute the structural path for a node: `#<escaped-id>` when an id
/// exists (ids are assumed page-unique), else up to [`MAX_PATH_SEGMENTS`]
/// `tag:nth-child(k)` segments joined with ` > `, outermost first.
///
/// Deterministic for a fixed tree shape, but not mutation-proof: a sibling
/// inserted above the node shifts every `nth-child` index below it.
pub fn build_path(tree: &DomTree, id: NodeId) -> Option<String> {
    let node = tree.node(id)?;
    if !node.id.is_empty() {
        return Some(format!("#{}", escape_css_ident(&node.id)));
    }
    let mut segments = Vec::new();
    let mut cur = Some(id);
    while let Some(idx) = cur {
        if segments.len() == MAX_PATH_SEGMENTS {
            break;
        }
        let n = tree.node(idx)?;
        segments.push(format!("{}:nth-child({})", n.tag, n.child_slot));
        cur = n.parent;
    }
    segments.reverse();
    Some(segments.join(" > "))
}

/// Escape a raw attribute id into a CSS identifier, so `#<id>` selectors
/// survive ids containing `.`/`:`/leading digits.
pub fn escape_css_ident(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, c) in raw.chars().enumerate() {
        if i == 0 && c.is_ascii_digit() {
            out.push_str(&format!("\\{:x} ", c as u32));
        } else if c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{el, resolve};

    #[test]
    fn id_short_circuits_to_escaped_anchor() {
        let tree = DomTree::from_root(
            el("div")
                .child(el("button").id("go"))
                .child(el("button").id("a.b:c"))
                .child(el("button").id("1up"))
                .build(),
        );
        assert_eq!(build_path(&tree, 1).as_deref(), Some("#go"));
        assert_eq!(build_path(&tree, 2).as_deref(), Some("#a\\.b\\:c"));
        assert_eq!(build_path(&tree, 3).as_deref(), Some("#\\31 up"));
    }

    #[test]
    fn path_walks_up_with_one_based_child_indices() {
        let tree = DomTree::from_root(
            el("body")
                .child(el("div"))
                .child(el("div").child(el("span")).child(el("a")))
                .build(),
        );
        // body(0) > div(1), div(2) > span(3), a(4)
        assert_eq!(
            build_path(&tree, 4).as_deref(),
            Some("body:nth-child(1) > div:nth-child(2) > a:nth-child(2)")
        );
    }

    #[test]
    fn path_is_capped_at_six_segments() {
        let mut node = el("a");
        for tag in ["div", "div", "div", "div", "div", "div", "div", "body"] {
            node = el(tag).child(node);
        }
        let tree = DomTree::from_root(node.build());
        let deepest = tree.len() - 1;
        let path = build_path(&tree, deepest).unwrap();
        assert_eq!(path.split(" > ").count(), MAX_PATH_SEGMENTS);
        assert!(path.ends_with("a:nth-child(1)"));
        assert!(!path.starts_with("body"));
    }

    #[test]
    fn path_is_deterministic_on_an_unchanged_tree() {
        let tree = DomTree::from_root(
            el("body")
                .child(el("main").child(el("p")).child(el("a")))
                .build(),
        );
        let first = build_path(&tree, 3);
        let second = build_path(&tree, 3);
        assert_eq!(first, second);
        // and the emitted chain resolves back to the same node
        assert_eq!(resolve(&tree, first.as_deref().unwrap()), Some(3));
    }

    #[test]
    fn visibility_honors_attributes_styles_and_size() {
        let visible = ElementNode::from_raw(el("button").text("ok").build());
        assert!(is_visible(&visible));

        let hidden_attr = ElementNode::from_raw(el("button").attr("hidden", "").build());
        assert!(!is_visible(&hidden_attr));

        let aria_hidden = ElementNode::from_raw(el("button").attr("aria-hidden", "true").build());
        assert!(!is_visible(&aria_hidden));

        let disabled = ElementNode::from_raw(el("button").attr("disabled", "").build());
        assert!(!is_visible(&disabled));

        let aria_disabled =
            ElementNode::from_raw(el("button").attr("aria-disabled", "true").build());
        assert!(!is_visible(&aria_disabled));

        let display_none = ElementNode::from_raw(el("button").style("none", "visible", 1.0).build());
        assert!(!is_visible(&display_none));

        let transparent = ElementNode::from_raw(el("button").style("block", "visible", 0.0).build());
        assert!(!is_visible(&transparent));

        let tiny = ElementNode::from_raw(el("button").rect(40.0, 1.0).build());
        assert!(!is_visible(&tiny));

        // fails open: no style and no rect data means visible
        let bare = ElementNode::from_raw(RawNode {
            tag: "button".into(),
            ..Default::default()
        });
        assert!(is_visible(&bare));
    }
}
