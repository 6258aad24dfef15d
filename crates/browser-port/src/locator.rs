use serde::{Deserialize, Serialize};

/// Attribute used to tag elements matched by injected resolution scripts.
/// The synthesized `[data-autoapply-anchor="…"]` selector is what an
/// [`ElementHandle`] carries afterwards.
pub const ANCHOR_ATTR: &str = "data-autoapply-anchor";

/// One candidate strategy for locating an element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    /// Plain CSS selector.
    Css(String),
    /// ARIA role plus accessible name (aria-label, labelledby chain, title
    /// or visible text).
    Role { role: String, name: String },
    /// Visible text content; `exact` toggles equality vs containment.
    Text { needle: String, exact: bool },
}

impl Locator {
    pub fn describe(&self) -> String {
        match self {
            Locator::Css(selector) => format!("css:{selector}"),
            Locator::Role { role, name } => format!("role:{role}[name={name}]"),
            Locator::Text { needle, exact } => {
                if *exact {
                    format!("text={needle}")
                } else {
                    format!("text~={needle}")
                }
            }
        }
    }
}

/// Ordered fallback chain of locator strategies. Candidates are tried in
/// order and the first hit wins; exhausting the chain is the typed miss
/// `PortErrorKind::ElementNotFound`, never a panic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectorSpec {
    pub candidates: Vec<Locator>,
}

impl SelectorSpec {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            candidates: vec![Locator::Css(selector.into())],
        }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            candidates: vec![Locator::Role {
                role: role.into(),
                name: name.into(),
            }],
        }
    }

    pub fn text(needle: impl Into<String>, exact: bool) -> Self {
        Self {
            candidates: vec![Locator::Text {
                needle: needle.into(),
                exact,
            }],
        }
    }

    pub fn or_css(mut self, selector: impl Into<String>) -> Self {
        self.candidates.push(Locator::Css(selector.into()));
        self
    }

    pub fn or_role(mut self, role: impl Into<String>, name: impl Into<String>) -> Self {
        self.candidates.push(Locator::Role {
            role: role.into(),
            name: name.into(),
        });
        self
    }

    pub fn or_text(mut self, needle: impl Into<String>, exact: bool) -> Self {
        self.candidates.push(Locator::Text {
            needle: needle.into(),
            exact,
        });
        self
    }

    pub fn describe(&self) -> String {
        self.candidates
            .iter()
            .map(Locator::describe)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Opaque reference to an element matched by a session. In the CDP
/// implementation this is a synthesized selector over [`ANCHOR_ATTR`];
/// fakes are free to carry any stable string.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ElementHandle {
    selector: String,
}

impl ElementHandle {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }
}

pub(crate) fn js_literal(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Pull the synthesized selector out of a resolution script's answer.
pub(crate) fn extract_selector(value: &serde_json::Value) -> Option<String> {
    let status = value.get("status").and_then(|v| v.as_str())?;
    match status {
        "ok" => value
            .get("selector")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

fn scope_prelude(scope: Option<&str>) -> String {
    match scope {
        Some(selector) => format!(
            "const root = document.querySelector({scope});\n            if (!root) {{ return {{ status: 'miss' }}; }}\n            const scanRoot = root;",
            scope = js_literal(selector)
        ),
        None => "const root = document;\n            const scanRoot = document.body;".to_string(),
    }
}

/// Build the script resolving a single candidate. The script tags the match
/// with `attr=token` and answers `{status:'ok', selector}` or
/// `{status:'miss'}`.
pub(crate) fn resolve_expression(locator: &Locator, scope: Option<&str>, token: &str) -> String {
    let prelude = scope_prelude(scope);
    let attr = js_literal(ANCHOR_ATTR);
    let token = js_literal(token);
    match locator {
        Locator::Css(selector) => format!(
            r#"(() => {{
            {prelude}
            let el;
            try {{ el = root.querySelector({selector}); }} catch (err) {{ return {{ status: 'miss' }}; }}
            if (!el) {{ return {{ status: 'miss' }}; }}
            el.setAttribute({attr}, {token});
            return {{ status: 'ok', selector: '[' + {attr} + '="' + {token} + '"]' }};
        }})()"#,
            prelude = prelude,
            selector = js_literal(selector),
            attr = attr,
            token = token,
        ),
        Locator::Role { role, name } => format!(
            r#"(() => {{
            {prelude}
            const targetName = {name};
            const normalize = (input) => (input || '').trim().toLowerCase();
            const computeName = (el) => {{
                if (!el) return '';
                const label = el.getAttribute('aria-label');
                if (label) return label.trim();
                const labelledby = el.getAttribute('aria-labelledby');
                if (labelledby) {{
                    return labelledby.split(/\s+/)
                        .map(id => document.getElementById(id))
                        .map(node => node ? (node.textContent || '') : '')
                        .join(' ')
                        .trim();
                }}
                if (el.title) return el.title.trim();
                return (el.innerText || el.textContent || '').trim();
            }};
            const nodes = Array.from(root.querySelectorAll('[role=' + JSON.stringify({role}) + ']'));
            const match = targetName
                ? nodes.find(el => normalize(computeName(el)).includes(normalize(targetName)))
                : nodes[0];
            if (!match) {{ return {{ status: 'miss' }}; }}
            match.setAttribute({attr}, {token});
            return {{ status: 'ok', selector: '[' + {attr} + '="' + {token} + '"]' }};
        }})()"#,
            prelude = prelude,
            role = js_literal(role),
            name = js_literal(name),
            attr = attr,
            token = token,
        ),
        Locator::Text { needle, exact } => format!(
            r#"(() => {{
            {prelude}
            const target = {needle};
            const exact = {exact};
            const normalize = (input) => (input || '').trim();
            const lower = (input) => normalize(input).toLowerCase();
            const isVisible = (el) => {{
                if (!(el instanceof Element)) return false;
                const style = window.getComputedStyle(el);
                if (style.visibility === 'hidden' || style.display === 'none') return false;
                const rect = el.getBoundingClientRect();
                return rect.width > 0 || rect.height > 0 || el.getClientRects().length > 0;
            }};
            const nodes = Array.from(scanRoot.querySelectorAll('*'));
            const match = nodes.find(el => {{
                if (!isVisible(el)) return false;
                const value = normalize(el.innerText || el.textContent || '');
                if (!value) return false;
                if (exact) {{ return lower(value) === lower(target); }}
                return lower(value).includes(lower(target));
            }});
            if (!match) {{ return {{ status: 'miss' }}; }}
            match.setAttribute({attr}, {token});
            return {{ status: 'ok', selector: '[' + {attr} + '="' + {token} + '"]' }};
        }})()"#,
            prelude = prelude,
            needle = js_literal(needle),
            exact = if *exact { "true" } else { "false" },
            attr = attr,
            token = token,
        ),
    }
}

/// Build the script resolving every match of a candidate (bounded by
/// `limit`). Each match is tagged `attr=token-N`; the answer carries the
/// synthesized selectors in document order.
pub(crate) fn resolve_all_expression(locator: &Locator, token: &str, limit: usize) -> String {
    let attr = js_literal(ANCHOR_ATTR);
    let token = js_literal(token);
    let collector = match locator {
        Locator::Css(selector) => format!(
            "let nodes;\n            try {{ nodes = Array.from(document.querySelectorAll({selector})); }} catch (err) {{ nodes = []; }}",
            selector = js_literal(selector)
        ),
        Locator::Role { role, name } => format!(
            r#"const targetName = {name};
            const normalize = (input) => (input || '').trim().toLowerCase();
            let nodes = Array.from(document.querySelectorAll('[role=' + JSON.stringify({role}) + ']'));
            if (targetName) {{
                nodes = nodes.filter(el => normalize(el.getAttribute('aria-label') || el.innerText || el.textContent || '').includes(normalize(targetName)));
            }}"#,
            role = js_literal(role),
            name = js_literal(name),
        ),
        Locator::Text { needle, exact } => format!(
            r#"const target = {needle};
            const exact = {exact};
            const lower = (input) => ((input || '').trim()).toLowerCase();
            const nodes = Array.from(document.querySelectorAll('body *')).filter(el => {{
                const value = (el.innerText || el.textContent || '').trim();
                if (!value) return false;
                if (exact) {{ return lower(value) === lower(target); }}
                return lower(value).includes(lower(target));
            }});"#,
            needle = js_literal(needle),
            exact = if *exact { "true" } else { "false" },
        ),
    };

    format!(
        r#"(() => {{
            {collector}
            const limit = {limit};
            const selectors = [];
            nodes.slice(0, limit).forEach((el, idx) => {{
                const value = {token} + '-' + idx;
                el.setAttribute({attr}, value);
                selectors.push('[' + {attr} + '="' + value + '"]');
            }});
            return {{ status: 'ok', selectors: selectors }};
        }})()"#,
        collector = collector,
        limit = limit,
        attr = attr,
        token = token,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_preserves_candidate_order() {
        let spec = SelectorSpec::css("#login")
            .or_role("button", "Sign in")
            .or_text("Sign in", true);
        assert_eq!(spec.candidates.len(), 3);
        assert!(matches!(spec.candidates[0], Locator::Css(_)));
        assert!(matches!(spec.candidates[2], Locator::Text { exact: true, .. }));
        assert_eq!(
            spec.describe(),
            "css:#login | role:button[name=Sign in] | text=Sign in"
        );
    }

    #[test]
    fn resolve_expression_embeds_token_and_attr() {
        let locator = Locator::Css(".apply-button".to_string());
        let script = resolve_expression(&locator, None, "anchor-42");
        assert!(script.contains("\".apply-button\""));
        assert!(script.contains("\"anchor-42\""));
        assert!(script.contains(ANCHOR_ATTR));
    }

    #[test]
    fn resolve_expression_scopes_to_parent_selector() {
        let locator = Locator::Text {
            needle: "Easy apply".to_string(),
            exact: false,
        };
        let script = resolve_expression(&locator, Some("[data-autoapply-anchor=\"card-1\"]"), "t");
        assert!(script.contains("document.querySelector(\"[data-autoapply-anchor=\\\"card-1\\\"]\")"));
        assert!(script.contains("scanRoot.querySelectorAll"));
    }

    #[test]
    fn resolve_all_expression_caps_matches() {
        let locator = Locator::Css("ul.results > li".to_string());
        let script = resolve_all_expression(&locator, "cards", 50);
        assert!(script.contains("const limit = 50;"));
        assert!(script.contains("\"cards\""));
    }

    #[test]
    fn extract_selector_requires_ok_status() {
        let hit = serde_json::json!({ "status": "ok", "selector": "[x=\"1\"]" });
        let miss = serde_json::json!({ "status": "miss" });
        assert_eq!(extract_selector(&hit).as_deref(), Some("[x=\"1\"]"));
        assert_eq!(extract_selector(&miss), None);
    }

    #[test]
    fn selector_spec_round_trips_through_serde() {
        let spec = SelectorSpec::role("dialog", "Apply").or_css(".modal");
        let yaml = serde_json::to_string(&spec).unwrap();
        let back: SelectorSpec = serde_json::from_str(&yaml).unwrap();
        assert_eq!(spec, back);
    }
}
