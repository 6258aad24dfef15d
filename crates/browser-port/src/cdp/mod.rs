//! CDP-backed [`BrowserSession`] implementation: one Chromium child (or an
//! attached remote browser), one page target, raw DevTools commands.

pub mod transport;
mod util;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{PortError, PortErrorKind};
use crate::locator::{
    extract_selector, js_literal, resolve_all_expression, resolve_expression, ElementHandle,
    Locator, SelectorSpec,
};
use crate::session::{BrowserSession, CookieParam, WaitCondition};

pub use transport::{CdpTransport, ChromiumTransport, CommandTarget};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOCATE_ALL_LIMIT: usize = 60;

/// A live page bound to one CDP session id. All trait operations go through
/// the page session; browser-scoped commands are reserved for attach/close.
pub struct CdpBrowserSession {
    transport: Arc<dyn CdpTransport>,
    session_id: String,
}

impl CdpBrowserSession {
    /// Launch a browser per `cfg` and attach to its first page.
    pub async fn launch(cfg: &SessionConfig) -> Result<Self, PortError> {
        let transport = Arc::new(ChromiumTransport::start(cfg).await?);
        Self::attach(transport).await
    }

    /// Attach to the first page target (creating `about:blank` when none
    /// exists yet) and bind all subsequent commands to its session id.
    pub async fn attach(transport: Arc<dyn CdpTransport>) -> Result<Self, PortError> {
        let targets = transport
            .send_command(CommandTarget::Browser, "Target.getTargets", json!({}))
            .await?;
        let mut target_id = targets
            .get("targetInfos")
            .and_then(|infos| infos.as_array())
            .and_then(|infos| {
                infos
                    .iter()
                    .find(|info| info.get("type").and_then(|t| t.as_str()) == Some("page"))
            })
            .and_then(|info| info.get("targetId").and_then(|id| id.as_str()))
            .map(|id| id.to_string());

        if target_id.is_none() {
            let created = transport
                .send_command(
                    CommandTarget::Browser,
                    "Target.createTarget",
                    json!({ "url": "about:blank" }),
                )
                .await?;
            target_id = created
                .get("targetId")
                .and_then(|id| id.as_str())
                .map(|id| id.to_string());
        }

        let target_id = target_id.ok_or_else(|| {
            PortError::new(PortErrorKind::Protocol).with_hint("no page target available")
        })?;

        let attached = transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(|id| id.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| {
                PortError::new(PortErrorKind::Protocol)
                    .with_hint("Target.attachToTarget returned no sessionId")
            })?;

        info!(target: "browser-port", %target_id, "attached to page target");

        Ok(Self {
            transport,
            session_id,
        })
    }

    async fn page_command(&self, method: &str, params: Value) -> Result<Value, PortError> {
        self.transport
            .send_command(
                CommandTarget::Session(self.session_id.clone()),
                method,
                params,
            )
            .await
    }

    /// Evaluate an expression in the page and unwrap `result.value`.
    async fn evaluate(&self, expression: &str) -> Result<Value, PortError> {
        let response = self
            .page_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            return Err(PortError::new(PortErrorKind::Protocol)
                .with_hint(format!("page script raised: {details}")));
        }

        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn resolve_candidate(
        &self,
        locator: &Locator,
        scope: Option<&str>,
    ) -> Result<Option<ElementHandle>, PortError> {
        let token = format!("a-{}", Uuid::new_v4().simple());
        let expression = resolve_expression(locator, scope, &token);
        let value = self.evaluate(&expression).await?;
        Ok(extract_selector(&value).map(ElementHandle::new))
    }

    async fn try_locate(
        &self,
        spec: &SelectorSpec,
        scope: Option<&str>,
    ) -> Result<Option<ElementHandle>, PortError> {
        for locator in &spec.candidates {
            if let Some(handle) = self.resolve_candidate(locator, scope).await? {
                debug!(target: "browser-port", strategy = %locator.describe(), "locator hit");
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    async fn element_center(&self, handle: &ElementHandle) -> Result<(f64, f64), PortError> {
        let expression = format!(
            r#"(() => {{
            const el = document.querySelector({selector});
            if (!el) {{ return {{ status: 'miss' }}; }}
            el.scrollIntoView({{ block: 'center', inline: 'nearest' }});
            const rect = el.getBoundingClientRect();
            return {{
                status: 'ok',
                x: rect.left + rect.width / 2,
                y: rect.top + rect.height / 2
            }};
        }})()"#,
            selector = js_literal(handle.selector()),
        );
        let value = self.evaluate(&expression).await?;
        if value.get("status").and_then(|v| v.as_str()) != Some("ok") {
            return Err(PortError::new(PortErrorKind::ElementNotFound)
                .with_hint(format!("handle went stale: {}", handle.selector())));
        }
        let x = value.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let y = value.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok((x, y))
    }

    async fn is_visible(&self, handle: &ElementHandle) -> Result<bool, PortError> {
        let expression = format!(
            r#"(() => {{
            const el = document.querySelector({selector});
            if (!el) {{ return false; }}
            const style = window.getComputedStyle(el);
            if (style.visibility === 'hidden' || style.display === 'none') {{ return false; }}
            const rect = el.getBoundingClientRect();
            return rect.width > 0 || rect.height > 0 || el.getClientRects().length > 0;
        }})()"#,
            selector = js_literal(handle.selector()),
        );
        Ok(self.evaluate(&expression).await?.as_bool().unwrap_or(false))
    }

    async fn condition_met(&self, condition: &WaitCondition) -> Result<bool, PortError> {
        match condition {
            WaitCondition::ElementVisible(spec) => match self.try_locate(spec, None).await? {
                Some(handle) => self.is_visible(&handle).await,
                None => Ok(false),
            },
            WaitCondition::ElementGone(spec) => match self.try_locate(spec, None).await? {
                Some(handle) => Ok(!self.is_visible(&handle).await?),
                None => Ok(true),
            },
            WaitCondition::UrlContains(fragment) => {
                Ok(self.read_url().await?.contains(fragment.as_str()))
            }
            WaitCondition::UrlContainsAny(fragments) => {
                let url = self.read_url().await?;
                Ok(fragments.iter().any(|fragment| url.contains(fragment)))
            }
        }
    }

    async fn read_url(&self) -> Result<String, PortError> {
        let value = self.evaluate("window.location.href").await?;
        value
            .as_str()
            .map(|url| url.to_string())
            .ok_or_else(|| {
                PortError::new(PortErrorKind::Protocol).with_hint("location.href was not a string")
            })
    }

    fn input_jitter_ms() -> u64 {
        // Instant machine-speed input is a bot tell; vary press/type pauses.
        rand::thread_rng().gen_range(30..=90)
    }
}

#[async_trait]
impl BrowserSession for CdpBrowserSession {
    async fn navigate(&self, url: &str, deadline: Duration) -> Result<(), PortError> {
        let response = self
            .page_command("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = response.get("errorText").and_then(|v| v.as_str()) {
            if !error_text.is_empty() {
                return Err(PortError::new(PortErrorKind::CdpIo)
                    .with_hint(format!("navigation to {url} failed: {error_text}")));
            }
        }

        // A fresh navigation may briefly still report the previous document
        // as complete; one poll tick absorbs that race.
        sleep(POLL_INTERVAL).await;
        let poll = async {
            loop {
                let state = self.evaluate("document.readyState").await?;
                if matches!(state.as_str(), Some("interactive") | Some("complete")) {
                    return Ok(());
                }
                sleep(POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(deadline, poll).await {
            Ok(result) => result,
            Err(_) => Err(PortError::new(PortErrorKind::NavTimeout)
                .with_hint(format!("document not ready after navigating to {url}"))),
        }
    }

    async fn current_url(&self) -> Result<String, PortError> {
        self.read_url().await
    }

    async fn locate(&self, spec: &SelectorSpec) -> Result<ElementHandle, PortError> {
        self.try_locate(spec, None).await?.ok_or_else(|| {
            PortError::new(PortErrorKind::ElementNotFound).with_hint(spec.describe())
        })
    }

    async fn locate_within(
        &self,
        scope: &ElementHandle,
        spec: &SelectorSpec,
    ) -> Result<ElementHandle, PortError> {
        self.try_locate(spec, Some(scope.selector()))
            .await?
            .ok_or_else(|| {
                PortError::new(PortErrorKind::ElementNotFound)
                    .with_hint(format!("{} within {}", spec.describe(), scope.selector()))
            })
    }

    async fn locate_all(&self, spec: &SelectorSpec) -> Result<Vec<ElementHandle>, PortError> {
        for locator in &spec.candidates {
            let token = format!("m-{}", Uuid::new_v4().simple());
            let expression = resolve_all_expression(locator, &token, LOCATE_ALL_LIMIT);
            let value = self.evaluate(&expression).await?;
            let selectors: Vec<String> = value
                .get("selectors")
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| entry.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            if !selectors.is_empty() {
                debug!(
                    target: "browser-port",
                    strategy = %locator.describe(),
                    count = selectors.len(),
                    "locator matched elements"
                );
                return Ok(selectors.into_iter().map(ElementHandle::new).collect());
            }
        }
        Ok(Vec::new())
    }

    async fn wait_for(
        &self,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> Result<(), PortError> {
        let poll = async {
            loop {
                if self.condition_met(condition).await? {
                    return Ok(());
                }
                sleep(POLL_INTERVAL).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                Err(PortError::new(PortErrorKind::WaitTimeout).with_hint(condition.describe()))
            }
        }
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), PortError> {
        let (x, y) = self.element_center(handle).await?;
        let pause = Self::input_jitter_ms();

        let press_payload = json!({
            "type": "mousePressed",
            "x": x,
            "y": y,
            "button": "left",
            "buttons": 1,
            "clickCount": 1,
            "pointerType": "mouse",
        });
        self.page_command("Input.dispatchMouseEvent", press_payload)
            .await?;

        sleep(Duration::from_millis(pause)).await;

        let release_payload = json!({
            "type": "mouseReleased",
            "x": x,
            "y": y,
            "button": "left",
            "buttons": 1,
            "clickCount": 1,
            "pointerType": "mouse",
        });
        self.page_command("Input.dispatchMouseEvent", release_payload)
            .await?;
        Ok(())
    }

    async fn fill(&self, handle: &ElementHandle, text: &str) -> Result<(), PortError> {
        let expression = format!(
            r#"(() => {{
            const el = document.querySelector({selector});
            if (!el) {{ return {{ status: 'not-found' }}; }}
            if (typeof el.focus === 'function') {{ el.focus(); }}
            if (typeof el.select === 'function') {{
                el.select();
            }} else if ('value' in el) {{
                el.value = '';
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            }}
            return {{ status: 'focused' }};
        }})()"#,
            selector = js_literal(handle.selector()),
        );

        let value = self.evaluate(&expression).await?;
        match value.get("status").and_then(|v| v.as_str()).unwrap_or("unknown") {
            "focused" => {}
            "not-found" => {
                return Err(PortError::new(PortErrorKind::ElementNotFound)
                    .with_hint(format!("handle went stale: {}", handle.selector())));
            }
            other => {
                return Err(PortError::new(PortErrorKind::Internal)
                    .with_hint(format!("failed to focus element (status: {other})")));
            }
        }

        sleep(Duration::from_millis(Self::input_jitter_ms())).await;
        self.page_command("Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), PortError> {
        let (code, virtual_key) = match key {
            "Escape" => ("Escape", 27),
            "Enter" => ("Enter", 13),
            "Tab" => ("Tab", 9),
            other => (other, 0),
        };

        self.page_command(
            "Input.dispatchKeyEvent",
            json!({
                "type": "rawKeyDown",
                "key": key,
                "code": code,
                "windowsVirtualKeyCode": virtual_key,
                "nativeVirtualKeyCode": virtual_key,
            }),
        )
        .await?;
        self.page_command(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key,
                "code": code,
                "windowsVirtualKeyCode": virtual_key,
                "nativeVirtualKeyCode": virtual_key,
            }),
        )
        .await?;
        Ok(())
    }

    async fn text_of(&self, handle: &ElementHandle) -> Result<String, PortError> {
        let expression = format!(
            r#"(() => {{
            const el = document.querySelector({selector});
            if (!el) {{ return {{ status: 'miss' }}; }}
            return {{ status: 'ok', text: (el.innerText || el.textContent || '').trim() }};
        }})()"#,
            selector = js_literal(handle.selector()),
        );
        let value = self.evaluate(&expression).await?;
        if value.get("status").and_then(|v| v.as_str()) != Some("ok") {
            return Err(PortError::new(PortErrorKind::ElementNotFound)
                .with_hint(format!("handle went stale: {}", handle.selector())));
        }
        Ok(value
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn attribute_of(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, PortError> {
        let expression = format!(
            r#"(() => {{
            const el = document.querySelector({selector});
            if (!el) {{ return {{ status: 'miss' }}; }}
            return {{ status: 'ok', value: el.getAttribute({name}) }};
        }})()"#,
            selector = js_literal(handle.selector()),
            name = js_literal(name),
        );
        let value = self.evaluate(&expression).await?;
        if value.get("status").and_then(|v| v.as_str()) != Some("ok") {
            return Err(PortError::new(PortErrorKind::ElementNotFound)
                .with_hint(format!("handle went stale: {}", handle.selector())));
        }
        Ok(value
            .get("value")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    async fn cookies(&self) -> Result<Vec<CookieParam>, PortError> {
        let response = self.page_command("Network.getCookies", json!({})).await?;
        let cookies = response
            .get("cookies")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(cookies).map_err(|err| {
            PortError::new(PortErrorKind::Protocol)
                .with_hint(format!("unexpected cookie payload: {err}"))
        })
    }

    async fn set_cookies(&self, cookies: &[CookieParam]) -> Result<(), PortError> {
        if cookies.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_value(cookies).map_err(|err| {
            PortError::new(PortErrorKind::Internal)
                .with_hint(format!("cookie serialization failed: {err}"))
        })?;
        self.page_command("Network.setCookies", json!({ "cookies": payload }))
            .await
            .map(|_| ())
    }

    async fn close(&self) -> Result<(), PortError> {
        if let Err(err) = self
            .transport
            .send_command(CommandTarget::Browser, "Browser.close", json!({}))
            .await
        {
            debug!(
                target: "browser-port",
                ?err,
                "browser close command failed (process may already be gone)"
            );
        }
        Ok(())
    }
}
