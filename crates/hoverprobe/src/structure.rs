//! Read-only page structure extraction.
//!
//! Gives an orchestrator something to plan probes with: ARIA menus, buttons,
//! links, landmarks and elements that look like they react to hover. Every
//! entry carries a suggested selector in a form [`Selector::parse`] accepts.
//!
//! [`Selector::parse`]: crate::Selector::parse

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::driver::PageDriver;
use crate::result::{ProbeError, ProbeResult};

/// Menus kept after de-duplication
pub const MAX_MENUS: usize = 20;
/// Buttons kept after de-duplication
pub const MAX_BUTTONS: usize = 20;
/// Links kept after de-duplication
pub const MAX_LINKS: usize = 30;
/// Landmarks kept after de-duplication
pub const MAX_LANDMARKS: usize = 10;
/// Hover candidates kept after de-duplication
pub const MAX_HOVER_CANDIDATES: usize = 30;

/// Shared selector builder: `#id`, test id, short text, then `tag.firstClass`
const BUILD_SELECTOR_JS: &str = r#"
    const textOf = el => (el.innerText || el.getAttribute('aria-label') || '').trim();
    const buildSelector = el => {
        if (el.id) return '#' + CSS.escape(el.id);
        const testId = el.getAttribute('data-testid');
        if (testId) return '[data-testid="' + CSS.escape(testId) + '"]';
        const text = textOf(el);
        if (text.length > 0 && text.length < 30 && !text.includes('"') && !text.includes('\n')) {
            return 'text="' + text + '"';
        }
        let selector = el.tagName.toLowerCase();
        if (typeof el.className === 'string') {
            const first = el.className.trim().split(/\s+/)[0];
            if (first) selector += '.' + first;
        }
        return selector;
    };
    const rendered = el => {
        const rect = el.getBoundingClientRect();
        return rect.width > 0 && rect.height > 0;
    };
    const shown = el => {
        const style = window.getComputedStyle(el);
        return rendered(el) && style.display !== 'none' && style.visibility !== 'hidden';
    };
"#;

const STRUCTURE_SCRIPT: &str = r#"(() => {
    __HELPERS__
    const collect = (selectors, map) => {
        const out = [];
        selectors.forEach(sel => {
            document.querySelectorAll(sel).forEach(el => {
                if (!rendered(el)) return;
                const entry = map(el);
                if (entry) out.push(entry);
            });
        });
        return out;
    };
    const menus = collect(
        ['[role="menubar"]', '[role="menu"]', '[role="menuitem"]',
         '[role="menuitemcheckbox"]', '[role="menuitemradio"]'],
        el => ({
            role: el.getAttribute('role') || el.tagName.toLowerCase(),
            name: textOf(el).substring(0, 50),
            selector: buildSelector(el),
            hasPopup: el.getAttribute('aria-haspopup'),
            expanded: el.getAttribute('aria-expanded'),
        }));
    const buttons = collect(['[role="button"]', 'button'], el => ({
        role: 'button',
        name: textOf(el).substring(0, 50),
        selector: buildSelector(el),
        hasPopup: el.getAttribute('aria-haspopup'),
        expanded: el.getAttribute('aria-expanded'),
    }));
    const links = collect(['[role="link"]', 'a[href]'], el => {
        const text = textOf(el);
        if (!text) return null;
        return {
            role: 'link',
            name: text.substring(0, 50),
            selector: buildSelector(el),
            href: el.getAttribute('href'),
            hasPopup: el.getAttribute('aria-haspopup'),
        };
    });
    const landmarks = collect(
        ['[role="navigation"]', '[role="banner"]', '[role="main"]', '[role="complementary"]',
         'nav', 'header', 'main', 'aside'],
        el => ({
            role: el.getAttribute('role') || el.tagName.toLowerCase(),
            name: el.getAttribute('aria-label') || '',
            selector: buildSelector(el),
        }));
    const hoverCandidates = [];
    document.querySelectorAll('*').forEach(el => {
        if (!shown(el)) return;
        const style = window.getComputedStyle(el);
        const popup = el.getAttribute('aria-haspopup');
        const expanded = el.getAttribute('aria-expanded');
        const toggle = el.getAttribute('data-toggle') || el.getAttribute('data-bs-toggle');
        const cls = typeof el.className === 'string' ? el.className : '';
        const menuClass = cls.includes('dropdown') || cls.includes('menu') || cls.includes('nav');
        if (popup || expanded !== null || toggle || (menuClass && style.cursor === 'pointer')) {
            hoverCandidates.push({
                tag: el.tagName,
                name: textOf(el).substring(0, 50),
                selector: buildSelector(el),
                ariaPopup: popup,
                ariaExpanded: expanded,
                dataToggle: toggle || null,
                role: el.getAttribute('role'),
            });
        }
    });
    return {
        pageTitle: document.title,
        url: window.location.href,
        menus, buttons, links, landmarks, hoverCandidates,
    };
})()"#;

const HOVERABLE_SCRIPT: &str = r#"(() => {
    __HELPERS__
    const results = [];
    const seen = new Set();
    const query = 'a, button, [role="button"], [role="menuitem"], [class*="dropdown"], [class*="menu"]';
    document.querySelectorAll(query).forEach(el => {
        if (!shown(el)) return;
        const text = textOf(el).substring(0, 50);
        const key = el.tagName + '-' + text;
        if (seen.has(key)) return;
        seen.add(key);
        results.push({
            tag: el.tagName,
            text,
            selector: buildSelector(el),
            hasExpandButton: el.querySelector('[class*="expand"], [class*="arrow"], [class*="caret"]') !== null,
            cursor: window.getComputedStyle(el).cursor,
        });
    });
    return results;
})()"#;

/// Structure extraction script
#[must_use]
pub fn structure_script() -> String {
    STRUCTURE_SCRIPT.replace("__HELPERS__", BUILD_SELECTOR_JS)
}

/// Hoverable element discovery script
#[must_use]
pub fn hoverable_script() -> String {
    HOVERABLE_SCRIPT.replace("__HELPERS__", BUILD_SELECTOR_JS)
}

/// A menu, button, link or landmark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AriaElement {
    /// ARIA role, or the lower-cased tag when there is none
    pub role: String,
    /// Accessible name (visible text or `aria-label`), at most 50 chars
    #[serde(default)]
    pub name: String,
    /// Suggested selector
    pub selector: String,
    /// `href` for links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// `aria-haspopup`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_popup: Option<String>,
    /// `aria-expanded`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded: Option<String>,
}

/// Element whose attributes suggest hover behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverCandidate {
    /// Upper-case tag name
    pub tag: String,
    /// Visible text, at most 50 chars
    #[serde(default)]
    pub name: String,
    /// Suggested selector
    pub selector: String,
    /// `aria-haspopup`
    #[serde(default)]
    pub aria_popup: Option<String>,
    /// `aria-expanded`
    #[serde(default)]
    pub aria_expanded: Option<String>,
    /// `data-toggle` / `data-bs-toggle`
    #[serde(default)]
    pub data_toggle: Option<String>,
    /// ARIA role
    #[serde(default)]
    pub role: Option<String>,
}

/// Counts after de-duplication, before caps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureSummary {
    /// Menus
    pub menus: usize,
    /// Buttons
    pub buttons: usize,
    /// Links
    pub links: usize,
    /// Landmarks
    pub landmarks: usize,
    /// Hover candidates
    pub hover_candidates: usize,
}

/// Interactive outline of the current page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageStructure {
    /// Document title
    pub page_title: String,
    /// Current URL
    pub url: String,
    /// Totals
    pub summary: StructureSummary,
    /// Up to [`MAX_MENUS`] menus
    pub menus: Vec<AriaElement>,
    /// Up to [`MAX_BUTTONS`] buttons
    pub buttons: Vec<AriaElement>,
    /// Up to [`MAX_LINKS`] links
    pub links: Vec<AriaElement>,
    /// Up to [`MAX_LANDMARKS`] landmarks
    pub landmarks: Vec<AriaElement>,
    /// Up to [`MAX_HOVER_CANDIDATES`] hover candidates
    pub hover_candidates: Vec<HoverCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStructure {
    #[serde(default)]
    page_title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    menus: Vec<AriaElement>,
    #[serde(default)]
    buttons: Vec<AriaElement>,
    #[serde(default)]
    links: Vec<AriaElement>,
    #[serde(default)]
    landmarks: Vec<AriaElement>,
    #[serde(default)]
    hover_candidates: Vec<HoverCandidate>,
}

impl From<RawStructure> for PageStructure {
    fn from(raw: RawStructure) -> Self {
        let menus = dedupe(raw.menus, |e| (e.selector.clone(), e.name.clone()));
        let buttons = dedupe(raw.buttons, |e| (e.selector.clone(), e.name.clone()));
        let links = dedupe(raw.links, |e| (e.selector.clone(), e.name.clone()));
        let landmarks = dedupe(raw.landmarks, |e| (e.selector.clone(), e.name.clone()));
        let hover_candidates = dedupe(raw.hover_candidates, |e| (e.selector.clone(), e.name.clone()));

        let summary = StructureSummary {
            menus: menus.len(),
            buttons: buttons.len(),
            links: links.len(),
            landmarks: landmarks.len(),
            hover_candidates: hover_candidates.len(),
        };

        Self {
            page_title: raw.page_title,
            url: raw.url,
            summary,
            menus: capped(menus, MAX_MENUS),
            buttons: capped(buttons, MAX_BUTTONS),
            links: capped(links, MAX_LINKS),
            landmarks: capped(landmarks, MAX_LANDMARKS),
            hover_candidates: capped(hover_candidates, MAX_HOVER_CANDIDATES),
        }
    }
}

/// Element returned by [`hoverable_elements`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverableElement {
    /// Upper-case tag name
    pub tag: String,
    /// Visible text, at most 50 chars
    #[serde(default)]
    pub text: String,
    /// Suggested selector
    pub selector: String,
    /// Contains an expand/arrow/caret child
    #[serde(default)]
    pub has_expand_button: bool,
    /// Computed `cursor`
    #[serde(default)]
    pub cursor: String,
}

fn dedupe<T, K>(items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T>
where
    K: std::hash::Hash + Eq,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

fn capped<T>(mut items: Vec<T>, max: usize) -> Vec<T> {
    items.truncate(max);
    items
}

/// Extract the page outline
pub async fn page_structure(driver: &mut dyn PageDriver) -> ProbeResult<PageStructure> {
    let value = driver.evaluate(&structure_script()).await?;
    let raw: RawStructure = serde_json::from_value(value)
        .map_err(|e| ProbeError::script(format!("malformed page structure: {e}")))?;
    let structure = PageStructure::from(raw);
    debug!(
        menus = structure.summary.menus,
        buttons = structure.summary.buttons,
        links = structure.summary.links,
        candidates = structure.summary.hover_candidates,
        "page structure extracted"
    );
    Ok(structure)
}

/// Visible elements that commonly carry hover behavior, de-duplicated by tag and text
pub async fn hoverable_elements(driver: &mut dyn PageDriver) -> ProbeResult<Vec<HoverableElement>> {
    let value = driver.evaluate(&hoverable_script()).await?;
    let elements: Vec<HoverableElement> = serde_json::from_value(value)
        .map_err(|e| ProbeError::script(format!("malformed hoverable list: {e}")))?;
    debug!(count = elements.len(), "hoverable elements found");
    Ok(elements)
}
