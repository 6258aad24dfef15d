use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PortError;
use crate::locator::{ElementHandle, SelectorSpec};

/// Cookie shape moved through `Network.getCookies` / `Network.setCookies`.
/// Field names follow the wire casing so the struct round-trips directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl CookieParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            url: None,
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
        }
    }
}

/// Conditions accepted by [`BrowserSession::wait_for`]. Expiry of the
/// bounded wait is the typed `PortErrorKind::WaitTimeout`, which callers
/// treat as a normal state transition.
#[derive(Clone, Debug)]
pub enum WaitCondition {
    /// An element matching the spec exists and is visible.
    ElementVisible(SelectorSpec),
    /// No visible element matches the spec (absent or hidden).
    ElementGone(SelectorSpec),
    /// The current URL contains the fragment.
    UrlContains(String),
    /// The current URL contains any of the fragments.
    UrlContainsAny(Vec<String>),
}

impl WaitCondition {
    pub fn describe(&self) -> String {
        match self {
            WaitCondition::ElementVisible(spec) => format!("element visible: {}", spec.describe()),
            WaitCondition::ElementGone(spec) => format!("element gone: {}", spec.describe()),
            WaitCondition::UrlContains(fragment) => format!("url contains '{fragment}'"),
            WaitCondition::UrlContainsAny(fragments) => {
                format!("url contains any of {fragments:?}")
            }
        }
    }
}

/// The browser capability the engine depends on. One implementation drives
/// a real Chromium over CDP ([`crate::cdp::CdpBrowserSession`]); tests
/// script fakes against the same contract.
///
/// All operations are page-scoped: a session owns exactly one page, matching
/// the strictly sequential per-batch processing model.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait (bounded by `deadline`) for the document to settle.
    async fn navigate(&self, url: &str, deadline: Duration) -> Result<(), PortError>;

    async fn current_url(&self) -> Result<String, PortError>;

    /// Try the spec's candidates in order; first hit wins. Exhaustion is
    /// `PortErrorKind::ElementNotFound`.
    async fn locate(&self, spec: &SelectorSpec) -> Result<ElementHandle, PortError>;

    /// Like [`Self::locate`] but resolves inside a previously located
    /// element.
    async fn locate_within(
        &self,
        scope: &ElementHandle,
        spec: &SelectorSpec,
    ) -> Result<ElementHandle, PortError>;

    /// Resolve every match of the first candidate that yields any, in
    /// document order. An empty vec is a valid answer, not an error.
    async fn locate_all(&self, spec: &SelectorSpec) -> Result<Vec<ElementHandle>, PortError>;

    /// Poll `condition` until it holds or `timeout` expires.
    async fn wait_for(&self, condition: &WaitCondition, timeout: Duration)
        -> Result<(), PortError>;

    async fn click(&self, handle: &ElementHandle) -> Result<(), PortError>;

    /// Focus the element, replace its current value with `text`.
    async fn fill(&self, handle: &ElementHandle, text: &str) -> Result<(), PortError>;

    /// Dispatch a key press to the focused element ("Escape", "Enter", …).
    async fn press_key(&self, key: &str) -> Result<(), PortError>;

    async fn text_of(&self, handle: &ElementHandle) -> Result<String, PortError>;

    async fn attribute_of(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, PortError>;

    async fn cookies(&self) -> Result<Vec<CookieParam>, PortError>;

    async fn set_cookies(&self, cookies: &[CookieParam]) -> Result<(), PortError>;

    async fn close(&self) -> Result<(), PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_param_serializes_wire_casing_and_skips_absent_fields() {
        let mut cookie = CookieParam::new("li_at", "token");
        cookie.http_only = Some(true);
        let value = serde_json::to_value(&cookie).unwrap();
        assert_eq!(value["name"], "li_at");
        assert_eq!(value["httpOnly"], true);
        assert!(value.get("domain").is_none());
        assert!(value.get("sameSite").is_none());
    }

    #[test]
    fn cookie_param_tolerates_unknown_wire_fields() {
        let raw = serde_json::json!({
            "name": "sess",
            "value": "v",
            "domain": ".example.com",
            "priority": "High",
            "sourceScheme": "Secure"
        });
        let cookie: CookieParam = serde_json::from_value(raw).unwrap();
        assert_eq!(cookie.domain.as_deref(), Some(".example.com"));
        assert!(cookie.expires.is_none());
    }

    #[test]
    fn wait_condition_describe_names_the_spec() {
        let cond = WaitCondition::ElementVisible(SelectorSpec::css(".modal"));
        assert_eq!(cond.describe(), "element visible: css:.modal");
    }
}
