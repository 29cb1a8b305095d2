//! Shared test fixtures: a DOM builder, a selector resolver for the paths
//! the core emits, and a recording in-memory [`PageDriver`].

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use crate::dom::{DomTree, ElementNode, NodeId, RawNode, Rect, StyleFlags, escape_css_ident};
use crate::driver::PageDriver;

/// Start building an element.
pub fn el(tag: &str) -> NodeBuilder {
    NodeBuilder(RawNode {
        tag: tag.to_string(),
        ..Default::default()
    })
}

#[derive(Debug, Clone)]
pub struct NodeBuilder(RawNode);

impl NodeBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.0.id = id.into();
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.0.text = text.into();
        self
    }

    pub fn attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn style(mut self, display: &str, visibility: &str, opacity: f64) -> Self {
        self.0.style = Some(StyleFlags {
            display: display.to_string(),
            visibility: visibility.to_string(),
            opacity,
        });
        self
    }

    pub fn rect(mut self, w: f64, h: f64) -> Self {
        self.0.rect = Some(Rect { x: 0.0, y: 0.0, w, h });
        self
    }

    pub fn child(mut self, child: NodeBuilder) -> Self {
        self.0.children.push(child.build());
        self
    }

    pub fn build(self) -> RawNode {
        self.0
    }
}

/// Resolve the two selector shapes the path builder emits: `#<escaped-id>`
/// and `tag:nth-child(k) > ...` chains of direct children.
pub fn resolve(tree: &DomTree, selector: &str) -> Option<NodeId> {
    if let Some(id_part) = selector.strip_prefix('#') {
        return tree
            .iter()
            .find(|(_, n)| !n.id.is_empty() && escape_css_ident(&n.id) == id_part)
            .map(|(id, _)| id);
    }

    let segments: Option<Vec<(String, usize)>> =
        selector.split(" > ").map(parse_segment).collect();
    let segments = segments?;
    if segments.is_empty() {
        return None;
    }

    'candidates: for (id, _) in tree.iter() {
        let mut cur = Some(id);
        for (tag, slot) in segments.iter().rev() {
            let Some(idx) = cur else {
                continue 'candidates;
            };
            let node = tree.node(idx)?;
            if node.tag != *tag || node.child_slot != *slot {
                continue 'candidates;
            }
            cur = node.parent;
        }
        return Some(id);
    }
    None
}

fn parse_segment(segment: &str) -> Option<(String, usize)> {
    let (tag, rest) = segment.split_once(":nth-child(")?;
    let slot = rest.strip_suffix(')')?.parse().ok()?;
    Some((tag.to_string(), slot))
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub root: RawNode,
    pub url: String,
    pub title: String,
    pub ready_state: String,
    pub body_len: u64,
    /// When set, every body_length sample differs, so idle never settles.
    pub grow_body: bool,
    pub collects: usize,
    pub navigations: Vec<String>,
    pub backs: usize,
    pub scrolls: Vec<String>,
    pub mouse_events: Vec<(String, String)>,
    pub native_clicks: Vec<String>,
    pub focused: Vec<String>,
    pub values: HashMap<String, String>,
    pub fired: Vec<(String, String)>,
}

/// A conforming in-memory driver that records every interaction.
#[derive(Debug)]
pub struct FakeDriver {
    pub state: Mutex<FakeState>,
}

impl FakeDriver {
    pub fn with_page(root: NodeBuilder) -> Self {
        FakeDriver {
            state: Mutex::new(FakeState {
                root: root.build(),
                url: "https://clinic.example/".into(),
                title: "Clinic".into(),
                ready_state: "complete".into(),
                body_len: 1_000,
                ..Default::default()
            }),
        }
    }

    fn tree(&self) -> DomTree {
        DomTree::from_root(self.state.lock().unwrap().root.clone())
    }
}

impl PageDriver for FakeDriver {
    fn url(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    fn title(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().title.clone())
    }

    fn collect(&self) -> Result<DomTree> {
        self.state.lock().unwrap().collects += 1;
        Ok(self.tree())
    }

    fn probe(&self, selector: &str) -> Result<Option<ElementNode>> {
        let tree = self.tree();
        Ok(resolve(&tree, selector).and_then(|id| tree.node(id).cloned()))
    }

    fn scroll_into_view(&self, selector: &str) -> Result<()> {
        self.state.lock().unwrap().scrolls.push(selector.to_string());
        Ok(())
    }

    fn fire_mouse(&self, selector: &str, kind: &str, _x: f64, _y: f64) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .mouse_events
            .push((selector.to_string(), kind.to_string()));
        Ok(())
    }

    fn native_click(&self, selector: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .native_clicks
            .push(selector.to_string());
        Ok(())
    }

    fn focus(&self, selector: &str) -> Result<()> {
        self.state.lock().unwrap().focused.push(selector.to_string());
        Ok(())
    }

    fn set_value(&self, selector: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .values
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    fn fire(&self, selector: &str, event: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .fired
            .push((selector.to_string(), event.to_string()));
        Ok(())
    }

    fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        state.url = url.to_string();
        state.ready_state = "complete".into();
        Ok(())
    }

    fn back(&self) -> Result<()> {
        self.state.lock().unwrap().backs += 1;
        Ok(())
    }

    fn ready_state(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().ready_state.clone())
    }

    fn body_length(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.grow_body {
            state.body_len += 97;
        }
        Ok(state.body_len)
    }
}
