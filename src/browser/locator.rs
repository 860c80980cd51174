//! Multi-strategy element location.
//!
//! The target portal's markup is unstable and undocumented, so every UI
//! action target is resolved through an ordered list of independent
//! [`Strategy`] values expressed as data. Evaluation is strict
//! top-to-bottom, the first currently-attached match wins, and each
//! strategy is time-boxed so one bad rule cannot stall the chain.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::browser::page::Evaluate;
use crate::errors::AutomationError;

/// Bound on one strategy attempt.
pub const STRATEGY_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Elements worth scanning when a text predicate has no structural anchor:
/// buttons, links and generic containers with button-like roles or classes.
const CLICKABLE_SCAN: &str = "button, a, input[type=\"button\"], input[type=\"submit\"], \
     div[role=\"button\"], span, [class*=\"button\"], [class*=\"btn\"]";

/// One rule for finding a UI element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Structural CSS selector.
    Css(String),
    /// Case-insensitive substring match over clickable-looking elements,
    /// satisfied by any of the keywords.
    Text { keywords: Vec<String> },
    /// Elements of one tag whose text content contains a phrase.
    TagText { tag: String, text: String },
}

impl Strategy {
    pub fn css(selector: &str) -> Self {
        Self::Css(selector.to_string())
    }

    pub fn keywords(keywords: &[&str]) -> Self {
        Self::Text {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn tag_text(tag: &str, text: &str) -> Self {
        Self::TagText {
            tag: tag.to_string(),
            text: text.to_string(),
        }
    }

    /// Compile to a probe script that registers a match in the page-side
    /// registry and returns its handle index, or -1 when nothing matched.
    fn probe_js(&self) -> String {
        let finder = match self {
            Strategy::Css(selector) => {
                format!("document.querySelector({})", js_string(selector))
            }
            Strategy::TagText { tag, text } => format!(
                "Array.from(document.querySelectorAll({tag})).find((el) => \
                 (el.textContent || '').trim().includes({text}))",
                tag = js_string(tag),
                text = js_string(text),
            ),
            Strategy::Text { keywords } => format!(
                "Array.from(document.querySelectorAll({scan})).find((el) => {{ \
                 const text = (el.textContent || '').trim().toLowerCase(); \
                 return {keywords}.some((k) => text.includes(k)); }})",
                scan = js_string(CLICKABLE_SCAN),
                keywords = js_string_array(keywords.iter().map(|k| k.to_lowercase())),
            ),
        };
        format!(
            "(() => {{ const el = {finder}; \
             if (!el || !el.isConnected) return -1; \
             window.__pbHits = window.__pbHits || []; \
             window.__pbHits.push(el); \
             return window.__pbHits.length - 1; }})()"
        )
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Css(selector) => write!(f, "css:{selector}"),
            Strategy::Text { keywords } => write!(f, "text:~[{}]", keywords.join("|")),
            Strategy::TagText { tag, text } => write!(f, "{tag}:contains({text})"),
        }
    }
}

/// A located element, addressed by its index in the page-side registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHandle(i64);

impl ElementHandle {
    /// Index of the element in the page-side registry.
    pub fn index(&self) -> i64 {
        self.0
    }
}

/// One candidate element from a failure dump: enough context for an
/// operator to write a better strategy offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateElement {
    pub tag: String,
    pub text: String,
    pub class: String,
    pub id: String,
    pub has_click_handler: bool,
}

/// Resolve `what` against the strategies in order. The first strategy
/// yielding a currently-attached element wins; there is no scoring across
/// strategies.
#[instrument(level = "debug", skip(page, strategies))]
pub async fn locate<E: Evaluate + ?Sized>(
    page: &E,
    what: &str,
    strategies: &[Strategy],
) -> Result<ElementHandle, AutomationError> {
    for strategy in strategies {
        match try_strategy(page, strategy).await {
            Ok(Some(handle)) => {
                debug!(%strategy, what, "strategy matched");
                return Ok(handle);
            }
            Ok(None) => debug!(%strategy, what, "strategy exhausted"),
            Err(e) => warn!(%strategy, what, error = %e, "strategy errored"),
        }
    }
    Err(AutomationError::ElementNotFound(what.to_string()))
}

async fn try_strategy<E: Evaluate + ?Sized>(
    page: &E,
    strategy: &Strategy,
) -> Result<Option<ElementHandle>, AutomationError> {
    let probe = strategy.probe_js();
    let deadline = tokio::time::Instant::now() + STRATEGY_TIMEOUT;
    loop {
        let value = page.evaluate(&probe).await?;
        if let Some(index) = value.as_i64() {
            if index >= 0 {
                return Ok(Some(ElementHandle(index)));
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Click a located element. Falls back to clicking ancestors when the
/// matched node itself refuses the click, which the portal's nested
/// button markup sometimes requires.
pub async fn click<E: Evaluate + ?Sized>(
    page: &E,
    handle: ElementHandle,
) -> Result<(), AutomationError> {
    let script = format!(
        "(() => {{ const hits = window.__pbHits || []; \
         let el = hits[{index}]; \
         if (!el || !el.isConnected) return false; \
         while (el && el !== document.body) {{ \
           try {{ el.click(); return true; }} catch (e) {{ el = el.parentElement; }} \
         }} \
         return false; }})()",
        index = handle.0
    );
    match page.evaluate(&script).await?.as_bool() {
        Some(true) => Ok(()),
        _ => Err(AutomationError::ElementNotFound(format!(
            "element #{} is no longer clickable",
            handle.0
        ))),
    }
}

/// Fill an input through the native value setter so framework-bound fields
/// observe the change, then raise input and change events.
pub async fn fill<E: Evaluate + ?Sized>(
    page: &E,
    handle: ElementHandle,
    value: &str,
) -> Result<(), AutomationError> {
    let script = format!(
        "(() => {{ const hits = window.__pbHits || []; \
         const el = hits[{index}]; \
         if (!el || !el.isConnected) return false; \
         const proto = el instanceof HTMLTextAreaElement \
           ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype; \
         const desc = Object.getOwnPropertyDescriptor(proto, 'value'); \
         if (desc && desc.set) {{ desc.set.call(el, {value}); }} else {{ el.value = {value}; }} \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
         return true; }})()",
        index = handle.0,
        value = js_string(value),
    );
    match page.evaluate(&script).await?.as_bool() {
        Some(true) => Ok(()),
        _ => Err(AutomationError::ElementNotFound(format!(
            "element #{} is no longer attached",
            handle.0
        ))),
    }
}

/// Structured dump of everything on the page that looks actionable, for
/// offline diagnosis after a locate failure.
pub async fn dump_candidates<E: Evaluate + ?Sized>(
    page: &E,
) -> Result<Vec<CandidateElement>, AutomationError> {
    const SCRIPT: &str = "(() => Array.from(document.querySelectorAll(\
        'button, a, input, span, div[role=\"button\"], [class*=\"button\"], [class*=\"btn\"]'))\
        .map((el) => ({\
          tag: el.tagName,\
          text: (el.textContent || '').trim().slice(0, 120),\
          class: typeof el.className === 'string' ? el.className : '',\
          id: el.id || '',\
          has_click_handler: el.onclick != null || el.hasAttribute('onclick'),\
        }))\
        .filter((el) => el.text.length > 0)\
        .slice(0, 200))()";
    let value = page.evaluate(SCRIPT).await?;
    serde_json::from_value(value)
        .map_err(|e| AutomationError::Protocol(format!("candidate dump: {e}")))
}

fn js_string(raw: &str) -> String {
    Value::String(raw.to_string()).to_string()
}

fn js_string_array(items: impl Iterator<Item = String>) -> String {
    let quoted: Vec<String> = items.map(|item| js_string(&item)).collect();
    format!("[{}]", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_probe_embeds_escaped_selector() {
        let probe = Strategy::css("input[placeholder=\"公司代碼\"]").probe_js();
        assert!(probe.contains("document.querySelector"));
        assert!(probe.contains("公司代碼"));
        assert!(probe.contains("__pbHits"));
    }

    #[test]
    fn text_probe_lowercases_keywords() {
        let probe = Strategy::keywords(&["Login", "Sign IN"]).probe_js();
        assert!(probe.contains("\"login\""));
        assert!(probe.contains("\"sign in\""));
        assert!(!probe.contains("Sign IN"));
    }

    #[test]
    fn tag_text_probe_scopes_to_tag() {
        let probe = Strategy::tag_text("span", "上班").probe_js();
        assert!(probe.contains("querySelectorAll(\"span\")"));
        assert!(probe.contains("上班"));
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
    }

    #[test]
    fn strategy_display_is_compact() {
        assert_eq!(Strategy::css("#x").to_string(), "css:#x");
        assert_eq!(
            Strategy::keywords(&["a", "b"]).to_string(),
            "text:~[a|b]"
        );
        assert_eq!(Strategy::tag_text("span", "x").to_string(), "span:contains(x)");
    }
}
