//! Target locators as handed over by the orchestrator.
//!
//! Accepted forms:
//!
//! - plain CSS (`nav > li.products`), optionally prefixed with `css=`
//! - `text="Products"` (exact match after whitespace normalization)
//! - `text=products` (case-insensitive substring)
//! - `data-testid=menu-toggle`
//! - `xpath=//nav/li[2]` or any string starting with `//`
//!
//! Every form compiles to a JavaScript expression yielding an array of
//! matching elements in document order. Text matches keep only the innermost
//! elements, so `text="Products"` resolves to the `<a>` rather than its `<li>`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::result::{ProbeError, ProbeResult};

/// Parsed element locator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Selector {
    /// CSS selector (e.g., "button.primary")
    Css(String),
    /// XPath expression
    XPath(String),
    /// Text content selector
    Text {
        /// Text to look for
        text: String,
        /// Whole-text, case-sensitive comparison
        exact: bool,
    },
    /// Test ID selector (data-testid attribute)
    TestId(String),
}

impl Selector {
    /// Parse a locator string
    pub fn parse(raw: &str) -> ProbeResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid(raw, "empty selector"));
        }

        if let Some(rest) = trimmed.strip_prefix("text=") {
            let rest = rest.trim();
            return match unquote(rest) {
                Some(text) if text.is_empty() => Err(invalid(raw, "empty text")),
                Some(text) => Ok(Self::Text {
                    text: text.to_string(),
                    exact: true,
                }),
                None if rest.is_empty() => Err(invalid(raw, "empty text")),
                None => Ok(Self::Text {
                    text: rest.to_string(),
                    exact: false,
                }),
            };
        }
        if let Some(rest) = trimmed.strip_prefix("data-testid=") {
            let id = unquote(rest.trim()).unwrap_or_else(|| rest.trim());
            if id.is_empty() {
                return Err(invalid(raw, "empty test id"));
            }
            return Ok(Self::TestId(id.to_string()));
        }
        if let Some(rest) = trimmed.strip_prefix("xpath=") {
            if rest.trim().is_empty() {
                return Err(invalid(raw, "empty xpath"));
            }
            return Ok(Self::XPath(rest.trim().to_string()));
        }
        if trimmed.starts_with("//") {
            return Ok(Self::XPath(trimmed.to_string()));
        }
        let css = trimmed.strip_prefix("css=").unwrap_or(trimmed).trim();
        if css.is_empty() {
            return Err(invalid(raw, "empty css"));
        }
        if has_unbalanced_brackets(css) {
            return Err(invalid(raw, "unbalanced brackets"));
        }
        Ok(Self::Css(css.to_string()))
    }

    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create an exact text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            exact: true,
        }
    }

    /// Create a test ID selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// JavaScript expression evaluating to an array of matching elements
    #[must_use]
    pub fn to_query(&self) -> String {
        match self {
            Self::Css(css) => {
                format!("Array.from(document.querySelectorAll({}))", js_string(css))
            }
            Self::TestId(id) => {
                let css = format!("[data-testid={}]", js_string(id));
                format!("Array.from(document.querySelectorAll({}))", js_string(&css))
            }
            Self::XPath(xpath) => format!(
                "(() => {{ const r = document.evaluate({}, document, null, \
                 XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const out = []; \
                 for (let i = 0; i < r.snapshotLength; i++) {{ const n = r.snapshotItem(i); \
                 if (n instanceof Element) out.push(n); }} return out; }})()",
                js_string(xpath)
            ),
            Self::Text { text, exact } => format!(
                "(() => {{ const want = {}; const exact = {}; \
                 const norm = s => (s || '').replace(/\\s+/g, ' ').trim(); \
                 const hits = Array.from(document.querySelectorAll('body, body *')).filter(el => {{ \
                 const t = norm(el.innerText || el.textContent); \
                 return exact ? t === want : t.toLowerCase().includes(want.toLowerCase()); }}); \
                 return hits.filter(el => !hits.some(o => o !== el && el.contains(o))); }})()",
                js_string(text),
                exact
            ),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(css) => write!(f, "{css}"),
            Self::XPath(xpath) => write!(f, "xpath={xpath}"),
            Self::Text { text, exact: true } => write!(f, "text={}", js_string(text)),
            Self::Text { text, exact: false } => write!(f, "text={text}"),
            Self::TestId(id) => write!(f, "data-testid={id}"),
        }
    }
}

/// Encode as a JavaScript string literal
pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn invalid(raw: &str, message: &str) -> ProbeError {
    ProbeError::InvalidSelector {
        selector: raw.to_string(),
        message: message.to_string(),
    }
}

fn unquote(value: &str) -> Option<&str> {
    ['"', '\''].into_iter().find_map(|q| {
        value
            .strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}

fn has_unbalanced_brackets(css: &str) -> bool {
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut chars = css.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            // Escaped character, quoted or not
            (_, '\\') => {
                chars.next();
            }
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => {}
        }
    }
    depth != 0 || quote.is_some()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod parse_tests {
        use super::*;

        #[test]
        fn test_plain_css() {
            assert_eq!(
                Selector::parse("  nav > li.products ").unwrap(),
                Selector::css("nav > li.products")
            );
            assert_eq!(Selector::parse("css=#menu").unwrap(), Selector::css("#menu"));
        }

        #[test]
        fn test_quoted_text_is_exact() {
            assert_eq!(
                Selector::parse(r#"text="Products""#).unwrap(),
                Selector::text("Products")
            );
            assert_eq!(
                Selector::parse("text='Products'").unwrap(),
                Selector::text("Products")
            );
        }

        #[test]
        fn test_bare_text_is_fuzzy() {
            assert_eq!(
                Selector::parse("text=products").unwrap(),
                Selector::Text {
                    text: "products".into(),
                    exact: false
                }
            );
        }

        #[test]
        fn test_test_id_and_xpath() {
            assert_eq!(
                Selector::parse("data-testid=menu").unwrap(),
                Selector::test_id("menu")
            );
            assert_eq!(
                Selector::parse("//nav/li").unwrap(),
                Selector::XPath("//nav/li".into())
            );
            assert_eq!(
                Selector::parse("xpath=//a").unwrap(),
                Selector::XPath("//a".into())
            );
        }

        #[test]
        fn test_empty_forms_rejected() {
            for raw in ["", "   ", "text=", "text=\"\"", "css=", "data-testid=", "xpath="] {
                let err = Selector::parse(raw).unwrap_err();
                assert!(
                    matches!(err, ProbeError::InvalidSelector { .. }),
                    "{raw:?} should be rejected"
                );
            }
        }

        #[test]
        fn test_unbalanced_css_rejected() {
            assert!(Selector::parse("a[href='x'").is_err());
            assert!(Selector::parse("li:not(.x").is_err());
            assert!(Selector::parse("a[title=']']").is_ok());
        }

        #[test]
        fn test_escaped_characters_do_not_count() {
            assert!(Selector::parse(r#"[title="a\"b"]"#).is_ok());
            assert!(Selector::parse(r"#menu\[1\]").is_ok());
            assert!(Selector::parse(r"#menu\[1").is_ok());
            assert!(Selector::parse(r#"[title="a\"]"#).is_err());
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn test_css_query_escapes_quotes() {
            let query = Selector::css(r#"a[title="say \"hi\""]"#).to_query();
            assert!(query.starts_with("Array.from(document.querySelectorAll("));
            assert!(query.contains(r#"\"say"#));
        }

        #[test]
        fn test_test_id_query() {
            let query = Selector::test_id("score").to_query();
            assert!(query.contains("data-testid"));
            assert!(query.contains("score"));
        }

        #[test]
        fn test_text_query_keeps_innermost() {
            let query = Selector::text("Start").to_query();
            assert!(query.contains("const exact = true"));
            assert!(query.contains("el.contains(o)"));
        }

        #[test]
        fn test_display_round_trips_text() {
            let selector = Selector::text("Products");
            assert_eq!(selector.to_string(), r#"text="Products""#);
            assert_eq!(Selector::parse(&selector.to_string()).unwrap(), selector);
        }
    }
}
