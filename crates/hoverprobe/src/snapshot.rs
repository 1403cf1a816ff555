//! Structural snapshots of the visible, potentially interactive part of a page.
//!
//! A snapshot is the ordered list of candidate nodes (lists, links, buttons,
//! menu/popup/tooltip containers) that are currently rendered inside the
//! viewport. Two snapshots are compared by identity key only; there is no
//! pixel comparison.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::result::{ProbeError, ProbeResult};

/// Characters of visible text stored per node
pub const TEXT_LIMIT: usize = 50;

/// Characters of visible text that participate in the identity key
pub const KEY_TEXT_LIMIT: usize = 30;

/// Structural selector set a node must match to be captured
pub const CANDIDATE_SELECTORS: &[&str] = &[
    "ul",
    "li",
    "a",
    "button",
    "[class*=\"dropdown\"]",
    "[class*=\"menu\"]",
    "[class*=\"submenu\"]",
    "[class*=\"popup\"]",
    "[class*=\"tooltip\"]",
    "[class*=\"popover\"]",
    "[role=\"menu\"]",
    "[role=\"listbox\"]",
    "[role=\"tooltip\"]",
];

/// In-page script returning every visible candidate node as JSON
pub const SNAPSHOT_SCRIPT: &str = r#"(() => {
    const selectors = __SELECTORS__;
    const nodes = [];
    document.querySelectorAll(selectors.join(', ')).forEach(el => {
        const rect = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        const visible = rect.width > 0 && rect.height > 0 &&
            style.display !== 'none' &&
            style.visibility !== 'hidden' &&
            style.opacity !== '0' &&
            rect.top < window.innerHeight &&
            rect.bottom > 0;
        if (!visible) return;
        const cls = typeof el.className === 'string' ? el.className : (el.getAttribute('class') || '');
        nodes.push({
            tag: el.tagName,
            class_name: cls,
            id: el.id || '',
            text: Array.from((el.innerText || '').trim()).slice(0, 50).join(''),
            href: el.getAttribute('href') || '',
            top: Math.round(rect.top),
            left: Math.round(rect.left),
        });
    });
    return nodes;
})()"#;

/// Snapshot script with the selector list spliced in
#[must_use]
pub fn snapshot_script() -> String {
    let selectors = serde_json::Value::from(CANDIDATE_SELECTORS.to_vec()).to_string();
    SNAPSHOT_SCRIPT.replace("__SELECTORS__", &selectors)
}

/// One visible candidate node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleNode {
    /// Tag name as reported by the DOM (upper case for HTML)
    pub tag: String,
    /// Raw class attribute
    #[serde(default)]
    pub class_name: String,
    /// Element id
    #[serde(default)]
    pub id: String,
    /// Visible text, trimmed and truncated
    #[serde(default)]
    pub text: String,
    /// Link target; empty when absent
    #[serde(default)]
    pub href: String,
    /// Rounded viewport top
    pub top: i64,
    /// Rounded viewport left
    pub left: i64,
}

impl VisibleNode {
    /// Create a node at the given position
    #[must_use]
    pub fn new(tag: impl Into<String>, top: i64, left: i64) -> Self {
        Self {
            tag: tag.into(),
            class_name: String::new(),
            id: String::new(),
            text: String::new(),
            href: String::new(),
            top,
            left,
        }
    }

    /// Set the class attribute
    #[must_use]
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    /// Set the visible text (truncated to [`TEXT_LIMIT`] characters)
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into().trim().chars().take(TEXT_LIMIT).collect();
        self
    }

    /// Set the link target
    #[must_use]
    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = href.into();
        self
    }

    /// Set the id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Identity key: tag, classes, truncated text and rounded position
    #[must_use]
    pub fn identity_key(&self) -> String {
        let text: String = self.text.chars().take(KEY_TEXT_LIMIT).collect();
        format!(
            "{}-{}-{}-{}-{}",
            self.tag, self.class_name, text, self.top, self.left
        )
    }

    /// Anchor tag, case-insensitive
    #[must_use]
    pub fn is_anchor(&self) -> bool {
        self.tag.eq_ignore_ascii_case("a")
    }

    /// Anchor with a non-empty link target
    #[must_use]
    pub fn is_link(&self) -> bool {
        self.is_anchor() && !self.href.trim().is_empty()
    }

    /// `UL` or `LI`
    #[must_use]
    pub fn is_list_like(&self) -> bool {
        self.tag.eq_ignore_ascii_case("li") || self.tag.eq_ignore_ascii_case("ul")
    }

    /// Lower-cased class attribute contains any of `markers`
    #[must_use]
    pub fn class_contains_any(&self, markers: &[&str]) -> bool {
        let class = self.class_name.to_lowercase();
        markers.iter().any(|m| class.contains(m))
    }
}

/// Ordered collection of visible nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementSnapshot {
    nodes: Vec<VisibleNode>,
}

impl ElementSnapshot {
    /// Snapshot from nodes in document order
    #[must_use]
    pub fn new(nodes: Vec<VisibleNode>) -> Self {
        Self { nodes }
    }

    /// Decode the JSON produced by [`SNAPSHOT_SCRIPT`]
    pub fn from_json(value: serde_json::Value) -> ProbeResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| ProbeError::script(format!("malformed snapshot: {e}")))
    }

    /// Nodes in capture order
    #[must_use]
    pub fn nodes(&self) -> &[VisibleNode] {
        &self.nodes
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Set of identity keys
    #[must_use]
    pub fn keys(&self) -> HashSet<String> {
        self.nodes.iter().map(VisibleNode::identity_key).collect()
    }

    /// Nodes of `self` whose identity key does not occur in `before`, in order
    #[must_use]
    pub fn appeared_since<'a>(&'a self, before: &Self) -> Vec<&'a VisibleNode> {
        let known = before.keys();
        self.nodes
            .iter()
            .filter(|n| !known.contains(&n.identity_key()))
            .collect()
    }
}

impl From<Vec<VisibleNode>> for ElementSnapshot {
    fn from(nodes: Vec<VisibleNode>) -> Self {
        Self::new(nodes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn products() -> VisibleNode {
        VisibleNode::new("LI", 10, 20)
            .with_class("nav")
            .with_text("Products")
    }

    mod node_tests {
        use super::*;

        #[test]
        fn test_identity_key_layout() {
            assert_eq!(products().identity_key(), "LI-nav-Products-10-20");
        }

        #[test]
        fn test_identity_key_truncates_text() {
            let long = "x".repeat(80);
            let node = VisibleNode::new("A", 0, 0).with_text(&long);
            assert_eq!(node.text.chars().count(), TEXT_LIMIT);
            assert_eq!(node.identity_key(), format!("A--{}-0-0", "x".repeat(30)));
        }

        #[test]
        fn test_keys_differ_only_past_text_limit() {
            let a = VisibleNode::new("A", 0, 0).with_text(format!("{}one", "p".repeat(30)));
            let b = VisibleNode::new("A", 0, 0).with_text(format!("{}two", "p".repeat(30)));
            assert_eq!(a.identity_key(), b.identity_key());
        }

        #[test]
        fn test_link_detection() {
            assert!(VisibleNode::new("A", 0, 0).with_href("/x").is_link());
            assert!(!VisibleNode::new("A", 0, 0).with_href("  ").is_link());
            assert!(!VisibleNode::new("BUTTON", 0, 0).with_href("/x").is_link());
            assert!(VisibleNode::new("a", 0, 0).is_anchor());
        }

        #[test]
        fn test_class_markers_case_insensitive() {
            let node = VisibleNode::new("DIV", 0, 0).with_class("Nav-DropDown open");
            assert!(node.class_contains_any(&["dropdown"]));
            assert!(!node.class_contains_any(&["tooltip", "popover"]));
        }
    }

    mod snapshot_tests {
        use super::*;

        #[test]
        fn test_decode_script_output() {
            let value = serde_json::json!([
                {"tag": "A", "class_name": "", "id": "", "text": "Home",
                 "href": "/", "top": 4, "left": 8},
                {"tag": "UL", "class_name": "menu", "id": "main", "text": "",
                 "href": "", "top": 40, "left": 0}
            ]);
            let snapshot = ElementSnapshot::from_json(value).unwrap();
            assert_eq!(snapshot.len(), 2);
            assert_eq!(snapshot.nodes()[1].id, "main");
        }

        #[test]
        fn test_decode_rejects_garbage() {
            let err = ElementSnapshot::from_json(serde_json::json!({"tag": 1})).unwrap_err();
            assert!(matches!(err, ProbeError::Script { .. }));
        }

        #[test]
        fn test_appeared_since_preserves_order() {
            let before = ElementSnapshot::new(vec![products()]);
            let after = ElementSnapshot::new(vec![
                VisibleNode::new("A", 60, 20).with_text("Second"),
                products(),
                VisibleNode::new("A", 40, 20).with_text("First"),
            ]);
            let texts: Vec<&str> = after
                .appeared_since(&before)
                .iter()
                .map(|n| n.text.as_str())
                .collect();
            assert_eq!(texts, vec!["Second", "First"]);
        }

        #[test]
        fn test_moved_node_counts_as_new() {
            let before = ElementSnapshot::new(vec![products()]);
            let mut moved = products();
            moved.top += 1;
            let after = ElementSnapshot::new(vec![moved]);
            assert_eq!(after.appeared_since(&before).len(), 1);
        }

        #[test]
        fn test_script_embeds_selectors() {
            let script = snapshot_script();
            assert!(!script.contains("__SELECTORS__"));
            assert!(script.contains(r#"[role=\"tooltip\"]"#));
        }
    }

    fn arb_node() -> impl Strategy<Value = VisibleNode> {
        (
            prop_oneof![Just("A"), Just("LI"), Just("UL"), Just("DIV"), Just("BUTTON")],
            "[a-z -]{0,12}",
            "[A-Za-z ]{0,40}",
            -50i64..900,
            -50i64..1300,
        )
            .prop_map(|(tag, class, text, top, left)| {
                VisibleNode::new(tag, top, left)
                    .with_class(class)
                    .with_text(text)
            })
    }

    proptest! {
        #[test]
        fn prop_snapshot_never_differs_from_itself(nodes in prop::collection::vec(arb_node(), 0..40)) {
            let snapshot = ElementSnapshot::new(nodes);
            prop_assert!(snapshot.appeared_since(&snapshot.clone()).is_empty());
        }

        #[test]
        fn prop_identity_key_is_deterministic(node in arb_node()) {
            prop_assert_eq!(node.identity_key(), node.clone().identity_key());
        }
    }
}
