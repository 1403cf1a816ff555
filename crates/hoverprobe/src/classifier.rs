//! Behavior classification from a before/after snapshot pair.
//!
//! Pure and deterministic: the same two snapshots always produce the same
//! [`Classification`]. Priority is dropdown, then tooltip, then revealed
//! content. Tooltips built from list markup are therefore reported as
//! dropdowns; the ordering is kept because link-bearing or list-like
//! additions are navigation menus far more often than not.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ProbeConfig;
use crate::snapshot::{ElementSnapshot, VisibleNode};

/// Class substrings marking a menu
pub const MENU_MARKERS: &[&str] = &["menu", "dropdown"];

/// Class substrings marking a tooltip
pub const TOOLTIP_MARKERS: &[&str] = &["tooltip", "popover"];

/// What a hover did to the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorCategory {
    /// Menu-like or link-bearing content appeared
    Dropdown,
    /// Tooltip or popover appeared
    Tooltip,
    /// Something else appeared
    ContentRevealed,
    /// Hover delivered, nothing new became visible
    NoChange,
    /// The hover could not be delivered at all
    Unreachable,
}

impl BehaviorCategory {
    /// All categories, in report order
    pub const ALL: [Self; 5] = [
        Self::Dropdown,
        Self::Tooltip,
        Self::ContentRevealed,
        Self::NoChange,
        Self::Unreachable,
    ];

    /// Wire name (`content_revealed`, ...)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dropdown => "dropdown",
            Self::Tooltip => "tooltip",
            Self::ContentRevealed => "content_revealed",
            Self::NoChange => "no_change",
            Self::Unreachable => "unreachable",
        }
    }

    /// Human-readable label for summaries
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dropdown => "Dropdown menu",
            Self::Tooltip => "Tooltip",
            Self::ContentRevealed => "Content revealed",
            Self::NoChange => "No change",
            Self::Unreachable => "Unreachable",
        }
    }

    /// The hover revealed something
    #[must_use]
    pub const fn is_interactive(self) -> bool {
        match self {
            Self::Dropdown | Self::Tooltip | Self::ContentRevealed => true,
            Self::NoChange | Self::Unreachable => false,
        }
    }

    /// The hover reached the element (whatever it did)
    #[must_use]
    pub const fn was_delivered(self) -> bool {
        match self {
            Self::Unreachable => false,
            Self::Dropdown | Self::Tooltip | Self::ContentRevealed | Self::NoChange => true,
        }
    }
}

impl fmt::Display for BehaviorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A link that became visible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedLink {
    /// Link text
    pub text: String,
    /// Link target as written in the markup
    pub href: String,
}

impl RevealedLink {
    /// Create a revealed link
    #[must_use]
    pub fn new(text: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            href: href.into(),
        }
    }
}

/// Caps applied while classifying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierLimits {
    /// Maximum revealed links
    pub max_links: usize,
    /// Maximum distinct new tag names
    pub max_types: usize,
}

impl Default for ClassifierLimits {
    fn default() -> Self {
        Self {
            max_links: 10,
            max_types: 5,
        }
    }
}

impl From<&ProbeConfig> for ClassifierLimits {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            max_links: config.max_revealed_links,
            max_types: config.max_new_element_types,
        }
    }
}

/// Output of [`classify`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Category
    pub behavior: BehaviorCategory,
    /// Number of nodes that appeared
    pub new_elements_count: usize,
    /// Links among the new nodes, capped, in snapshot order
    pub revealed_links: Vec<RevealedLink>,
    /// Distinct tag names of the new nodes, first-seen order, capped
    pub new_element_types: Vec<String>,
}

/// Classify the change between two snapshots
#[must_use]
pub fn classify(
    before: &ElementSnapshot,
    after: &ElementSnapshot,
    limits: ClassifierLimits,
) -> Classification {
    let appeared = after.appeared_since(before);

    let revealed_links: Vec<RevealedLink> = appeared
        .iter()
        .filter(|n| n.is_link())
        .take(limits.max_links)
        .map(|n| RevealedLink::new(n.text.clone(), n.href.clone()))
        .collect();

    let mut new_element_types: Vec<String> = Vec::new();
    for node in &appeared {
        if new_element_types.len() >= limits.max_types {
            break;
        }
        if !new_element_types.contains(&node.tag) {
            new_element_types.push(node.tag.clone());
        }
    }

    let behavior = categorize(&appeared, !revealed_links.is_empty());

    Classification {
        behavior,
        new_elements_count: appeared.len(),
        revealed_links,
        new_element_types,
    }
}

fn categorize(appeared: &[&VisibleNode], has_links: bool) -> BehaviorCategory {
    if appeared.is_empty() {
        return BehaviorCategory::NoChange;
    }
    let menu_like = appeared
        .iter()
        .any(|n| n.is_list_like() || n.class_contains_any(MENU_MARKERS));
    if menu_like || has_links {
        return BehaviorCategory::Dropdown;
    }
    if appeared.iter().any(|n| n.class_contains_any(TOOLTIP_MARKERS)) {
        return BehaviorCategory::Tooltip;
    }
    BehaviorCategory::ContentRevealed
}

/// Per-category counts over a batch of probes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorTally {
    /// Dropdowns
    pub dropdown: usize,
    /// Tooltips
    pub tooltip: usize,
    /// Other revealed content
    pub content_revealed: usize,
    /// Delivered hovers with no effect
    pub no_change: usize,
    /// Hovers that could not be delivered
    pub unreachable: usize,
}

impl BehaviorTally {
    /// Empty tally
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one outcome
    pub fn record(&mut self, category: BehaviorCategory) {
        *self.slot(category) += 1;
    }

    /// Count for one category
    #[must_use]
    pub const fn count(&self, category: BehaviorCategory) -> usize {
        match category {
            BehaviorCategory::Dropdown => self.dropdown,
            BehaviorCategory::Tooltip => self.tooltip,
            BehaviorCategory::ContentRevealed => self.content_revealed,
            BehaviorCategory::NoChange => self.no_change,
            BehaviorCategory::Unreachable => self.unreachable,
        }
    }

    /// Total probes counted
    #[must_use]
    pub const fn total(&self) -> usize {
        self.dropdown + self.tooltip + self.content_revealed + self.no_change + self.unreachable
    }

    /// Probes that revealed something
    #[must_use]
    pub const fn interactive(&self) -> usize {
        self.dropdown + self.tooltip + self.content_revealed
    }

    fn slot(&mut self, category: BehaviorCategory) -> &mut usize {
        match category {
            BehaviorCategory::Dropdown => &mut self.dropdown,
            BehaviorCategory::Tooltip => &mut self.tooltip,
            BehaviorCategory::ContentRevealed => &mut self.content_revealed,
            BehaviorCategory::NoChange => &mut self.no_change,
            BehaviorCategory::Unreachable => &mut self.unreachable,
        }
    }
}

impl FromIterator<BehaviorCategory> for BehaviorTally {
    fn from_iter<I: IntoIterator<Item = BehaviorCategory>>(iter: I) -> Self {
        let mut tally = Self::new();
        for category in iter {
            tally.record(category);
        }
        tally
    }
}

impl Extend<BehaviorCategory> for BehaviorTally {
    fn extend<I: IntoIterator<Item = BehaviorCategory>>(&mut self, iter: I) {
        for category in iter {
            self.record(category);
        }
    }
}
