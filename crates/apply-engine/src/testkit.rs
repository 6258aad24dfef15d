//! Scripted in-memory `BrowserSession` for unit tests. The fake models the
//! page as a flat set of visible element keys (the first CSS candidate of
//! each profile spec) plus click effects, so tests describe platform
//! behavior instead of stubbing call sequences.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use browser_port::{
    BrowserSession, CookieParam, ElementHandle, Locator, PortError, PortErrorKind, SelectorSpec,
    WaitCondition,
};
use tokio_util::sync::CancellationToken;

use crate::credentials::{Credentials, CredentialsSource};
use crate::errors::AuthError;
use crate::selectors::PlatformProfile;

/// First candidate's CSS selector; the fake keys its world on these.
pub(crate) fn first_css(spec: &SelectorSpec) -> String {
    match spec.candidates.first() {
        Some(Locator::Css(selector)) => selector.clone(),
        other => panic!("profile spec must lead with a css candidate, got {other:?}"),
    }
}

fn candidate_key(locator: &Locator) -> String {
    match locator {
        Locator::Css(selector) => selector.clone(),
        Locator::Role { role, name } => format!("role:{role}:{name}"),
        Locator::Text { needle, .. } => format!("text:{needle}"),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Event {
    Navigate(String),
    SetCookies(usize),
    Fill { key: String, text: String },
    Click(String),
    Key(String),
    Close,
}

#[derive(Clone)]
enum Effect {
    Show(String),
    SetUrl(String),
}

/// How a posting page behaves once its quick-apply trigger is clicked.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ModalScript {
    /// Modal opens, submit works, confirmation appears.
    Confirms,
    /// Clicking the trigger does nothing.
    NeverOpens,
    /// Modal opens and submits, but no confirmation ever shows.
    NeverConfirms,
    /// Modal opens without any submit control.
    NoSubmitControl,
}

pub(crate) struct CardFixture {
    title: Option<String>,
    href: Option<String>,
    company: Option<String>,
    location: Option<String>,
    quick_apply: bool,
}

impl CardFixture {
    pub(crate) fn new(title: &str, href: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            href: Some(href.to_string()),
            company: None,
            location: None,
            quick_apply: false,
        }
    }

    /// A card with a link but no title: identity extraction must fail.
    pub(crate) fn broken() -> Self {
        Self {
            title: None,
            href: Some("/jobs/view/0/".to_string()),
            company: None,
            location: None,
            quick_apply: false,
        }
    }

    pub(crate) fn company(mut self, company: &str) -> Self {
        self.company = Some(company.to_string());
        self
    }

    pub(crate) fn location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub(crate) fn quick_apply(mut self) -> Self {
        self.quick_apply = true;
        self
    }
}

struct Keys {
    trigger: String,
    modal: String,
    modal_submit: String,
    modal_dismiss: String,
    modal_discard: String,
    confirmation: String,
}

struct World {
    keys: Keys,
    url: String,
    visible: Vec<String>,
    persistent_effects: HashMap<String, Vec<Effect>>,
    page_effects: HashMap<String, Vec<Effect>>,
    texts: HashMap<String, String>,
    attrs: HashMap<(String, String), String>,
    cookie_jar: Vec<CookieParam>,
    redirects: HashMap<String, String>,
    scripts: HashMap<String, ModalScript>,
    wildcard_script: Option<ModalScript>,
    cancel_hooks: HashMap<String, CancellationToken>,
    journal: Vec<Event>,
}

pub(crate) struct FakeSession {
    world: Mutex<World>,
}

impl FakeSession {
    /// The login page controls are present from the start; everything else
    /// is scripted per test.
    pub(crate) fn new(profile: &PlatformProfile) -> Self {
        let visible = vec![
            first_css(&profile.username_field),
            first_css(&profile.password_field),
            first_css(&profile.login_submit),
        ];
        Self {
            world: Mutex::new(World {
                keys: Keys {
                    trigger: first_css(&profile.quick_apply_trigger),
                    modal: first_css(&profile.modal),
                    modal_submit: first_css(&profile.modal_submit),
                    modal_dismiss: first_css(&profile.modal_dismiss),
                    modal_discard: first_css(&profile.modal_discard),
                    confirmation: first_css(&profile.confirmation_marker),
                },
                url: "about:blank".to_string(),
                visible,
                persistent_effects: HashMap::new(),
                page_effects: HashMap::new(),
                texts: HashMap::new(),
                attrs: HashMap::new(),
                cookie_jar: Vec::new(),
                redirects: HashMap::new(),
                scripts: HashMap::new(),
                wildcard_script: None,
                cancel_hooks: HashMap::new(),
                journal: Vec::new(),
            }),
        }
    }

    pub(crate) fn journal(&self) -> Vec<Event> {
        self.world.lock().unwrap().journal.clone()
    }

    /// Navigating to `from` lands on `to` instead.
    pub(crate) fn redirect(&self, from: &str, to: &str) {
        let mut guard = self.world.lock().unwrap();
        guard.redirects.insert(from.to_string(), to.to_string());
    }

    pub(crate) fn on_click_set_url(&self, spec: &SelectorSpec, url: &str) {
        let mut guard = self.world.lock().unwrap();
        guard
            .persistent_effects
            .entry(first_css(spec))
            .or_default()
            .push(Effect::SetUrl(url.to_string()));
    }

    pub(crate) fn on_click_show(&self, spec: &SelectorSpec, shown: &SelectorSpec) {
        let mut guard = self.world.lock().unwrap();
        let key = first_css(shown);
        guard
            .persistent_effects
            .entry(first_css(spec))
            .or_default()
            .push(Effect::Show(key));
    }

    pub(crate) fn set_cookie_jar(&self, cookies: Vec<CookieParam>) {
        self.world.lock().unwrap().cookie_jar = cookies;
    }

    /// Clicking the spec's element cancels the token (models an operator
    /// hitting ctrl-c mid-posting).
    pub(crate) fn cancel_on_click(&self, spec: &SelectorSpec, token: CancellationToken) {
        let mut guard = self.world.lock().unwrap();
        guard.cancel_hooks.insert(first_css(spec), token);
    }

    pub(crate) fn show_results(&self, profile: &PlatformProfile) {
        let mut guard = self.world.lock().unwrap();
        let key = first_css(&profile.results_container);
        guard.visible.push(key);
    }

    pub(crate) fn add_card(&self, profile: &PlatformProfile, fixture: CardFixture) {
        let mut guard = self.world.lock().unwrap();
        let world = &mut *guard;
        let card_base = first_css(&profile.result_card);
        let index = world
            .visible
            .iter()
            .filter(|key| key.starts_with(&format!("{card_base}#")))
            .count();
        let card_key = format!("{card_base}#{index}");
        world.visible.push(card_key.clone());

        if let Some(title) = fixture.title {
            let key = format!("{card_key} {}", first_css(&profile.card_title));
            world.visible.push(key.clone());
            world.texts.insert(key, title);
        }
        if let Some(href) = fixture.href {
            let key = format!("{card_key} {}", first_css(&profile.card_link));
            world.visible.push(key.clone());
            world.attrs.insert((key, "href".to_string()), href);
        }
        if let Some(company) = fixture.company {
            let key = format!("{card_key} {}", first_css(&profile.card_company));
            world.visible.push(key.clone());
            world.texts.insert(key, company);
        }
        if let Some(location) = fixture.location {
            let key = format!("{card_key} {}", first_css(&profile.card_location));
            world.visible.push(key.clone());
            world.texts.insert(key, location);
        }
        if fixture.quick_apply {
            let key = format!(
                "{card_key} {}",
                first_css(&profile.card_quick_apply_badge)
            );
            world.visible.push(key);
        }
    }

    /// Every navigated posting page behaves per `script`.
    pub(crate) fn script_posting(&self, _profile: &PlatformProfile, script: ModalScript) {
        self.world.lock().unwrap().wildcard_script = Some(script);
    }

    /// The posting page at `url` behaves per `script`.
    pub(crate) fn script_posting_at(
        &self,
        _profile: &PlatformProfile,
        url: &str,
        script: ModalScript,
    ) {
        let mut guard = self.world.lock().unwrap();
        guard.scripts.insert(url.to_string(), script);
    }

    fn apply_script(world: &mut World, script: ModalScript) {
        let trigger = world.keys.trigger.clone();
        let modal = world.keys.modal.clone();
        let submit = world.keys.modal_submit.clone();
        let dismiss = world.keys.modal_dismiss.clone();
        let confirmation = world.keys.confirmation.clone();

        world.visible.push(trigger.clone());
        match script {
            ModalScript::Confirms => {
                world.page_effects.insert(
                    trigger,
                    vec![
                        Effect::Show(modal),
                        Effect::Show(submit.clone()),
                        Effect::Show(dismiss),
                    ],
                );
                world
                    .page_effects
                    .insert(submit, vec![Effect::Show(confirmation)]);
            }
            ModalScript::NeverOpens => {
                world.page_effects.insert(trigger, Vec::new());
            }
            ModalScript::NeverConfirms => {
                world.page_effects.insert(
                    trigger,
                    vec![
                        Effect::Show(modal),
                        Effect::Show(submit.clone()),
                        Effect::Show(dismiss),
                    ],
                );
                world.page_effects.insert(submit, Vec::new());
            }
            ModalScript::NoSubmitControl => {
                world
                    .page_effects
                    .insert(trigger, vec![Effect::Show(modal), Effect::Show(dismiss)]);
            }
        }
    }

    fn spec_hit(world: &World, spec: &SelectorSpec) -> Option<String> {
        spec.candidates.iter().find_map(|candidate| {
            let key = candidate_key(candidate);
            world.visible.iter().any(|entry| entry == &key).then_some(key)
        })
    }

    fn condition_holds(world: &World, condition: &WaitCondition) -> bool {
        match condition {
            WaitCondition::ElementVisible(spec) => Self::spec_hit(world, spec).is_some(),
            WaitCondition::ElementGone(spec) => Self::spec_hit(world, spec).is_none(),
            WaitCondition::UrlContains(fragment) => world.url.contains(fragment.as_str()),
            WaitCondition::UrlContainsAny(fragments) => fragments
                .iter()
                .any(|fragment| world.url.contains(fragment.as_str())),
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str, _deadline: Duration) -> Result<(), PortError> {
        let mut guard = self.world.lock().unwrap();
        let world = &mut *guard;
        world.journal.push(Event::Navigate(url.to_string()));
        world.url = world
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());

        // Page turn: modal-flow state belongs to the page being left.
        let dynamic = [
            world.keys.trigger.clone(),
            world.keys.modal.clone(),
            world.keys.modal_submit.clone(),
            world.keys.modal_dismiss.clone(),
            world.keys.modal_discard.clone(),
            world.keys.confirmation.clone(),
        ];
        world.visible.retain(|key| !dynamic.contains(key));
        world.page_effects.clear();

        let script = world.scripts.get(url).copied().or(world.wildcard_script);
        if let Some(script) = script {
            Self::apply_script(world, script);
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, PortError> {
        Ok(self.world.lock().unwrap().url.clone())
    }

    async fn locate(&self, spec: &SelectorSpec) -> Result<ElementHandle, PortError> {
        let guard = self.world.lock().unwrap();
        Self::spec_hit(&guard, spec)
            .map(ElementHandle::new)
            .ok_or_else(|| {
                PortError::new(PortErrorKind::ElementNotFound).with_hint(spec.describe())
            })
    }

    async fn locate_within(
        &self,
        scope: &ElementHandle,
        spec: &SelectorSpec,
    ) -> Result<ElementHandle, PortError> {
        let guard = self.world.lock().unwrap();
        for candidate in &spec.candidates {
            let key = format!("{} {}", scope.selector(), candidate_key(candidate));
            if guard.visible.iter().any(|entry| entry == &key) {
                return Ok(ElementHandle::new(key));
            }
        }
        Err(PortError::new(PortErrorKind::ElementNotFound).with_hint(spec.describe()))
    }

    async fn locate_all(&self, spec: &SelectorSpec) -> Result<Vec<ElementHandle>, PortError> {
        let guard = self.world.lock().unwrap();
        for candidate in &spec.candidates {
            let key = candidate_key(candidate);
            let prefix = format!("{key}#");
            let matches: Vec<ElementHandle> = guard
                .visible
                .iter()
                .filter(|entry| *entry == &key || entry.starts_with(&prefix))
                .map(ElementHandle::new)
                .collect();
            if !matches.is_empty() {
                return Ok(matches);
            }
        }
        Ok(Vec::new())
    }

    async fn wait_for(
        &self,
        condition: &WaitCondition,
        _timeout: Duration,
    ) -> Result<(), PortError> {
        let guard = self.world.lock().unwrap();
        if Self::condition_holds(&guard, condition) {
            Ok(())
        } else {
            Err(PortError::new(PortErrorKind::WaitTimeout).with_hint(condition.describe()))
        }
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), PortError> {
        let mut guard = self.world.lock().unwrap();
        let world = &mut *guard;
        let key = handle.selector().to_string();
        world.journal.push(Event::Click(key.clone()));

        if let Some(token) = world.cancel_hooks.get(&key) {
            token.cancel();
        }

        let mut effects = Vec::new();
        if let Some(found) = world.persistent_effects.get(&key) {
            effects.extend(found.iter().cloned());
        }
        if let Some(found) = world.page_effects.get(&key) {
            effects.extend(found.iter().cloned());
        }
        for effect in effects {
            match effect {
                Effect::Show(shown) => {
                    if !world.visible.iter().any(|entry| entry == &shown) {
                        world.visible.push(shown);
                    }
                }
                Effect::SetUrl(url) => world.url = url,
            }
        }
        Ok(())
    }

    async fn fill(&self, handle: &ElementHandle, text: &str) -> Result<(), PortError> {
        let mut guard = self.world.lock().unwrap();
        guard.journal.push(Event::Fill {
            key: handle.selector().to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), PortError> {
        let mut guard = self.world.lock().unwrap();
        guard.journal.push(Event::Key(key.to_string()));
        Ok(())
    }

    async fn text_of(&self, handle: &ElementHandle) -> Result<String, PortError> {
        let guard = self.world.lock().unwrap();
        Ok(guard
            .texts
            .get(handle.selector())
            .cloned()
            .unwrap_or_default())
    }

    async fn attribute_of(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, PortError> {
        let guard = self.world.lock().unwrap();
        Ok(guard
            .attrs
            .get(&(handle.selector().to_string(), name.to_string()))
            .cloned())
    }

    async fn cookies(&self) -> Result<Vec<CookieParam>, PortError> {
        Ok(self.world.lock().unwrap().cookie_jar.clone())
    }

    async fn set_cookies(&self, cookies: &[CookieParam]) -> Result<(), PortError> {
        let mut guard = self.world.lock().unwrap();
        guard.journal.push(Event::SetCookies(cookies.len()));
        Ok(())
    }

    async fn close(&self) -> Result<(), PortError> {
        self.world.lock().unwrap().journal.push(Event::Close);
        Ok(())
    }
}

/// Credentials source returning fixed values (or a typed miss).
pub(crate) struct FixedCredentials {
    creds: Option<Credentials>,
}

impl FixedCredentials {
    pub(crate) fn ok(username: &str, secret: &str) -> Self {
        Self {
            creds: Some(Credentials::new(username, secret)),
        }
    }

    pub(crate) fn missing() -> Self {
        Self { creds: None }
    }
}

impl CredentialsSource for FixedCredentials {
    fn credentials(&self) -> Result<Credentials, AuthError> {
        self.creds.clone().ok_or(AuthError::MissingCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locate_falls_back_through_the_candidate_chain() {
        let profile = PlatformProfile::default();
        let session = FakeSession::new(&profile);
        {
            let mut guard = session.world.lock().unwrap();
            guard.visible.push("role:button:Easy Apply".to_string());
            guard.visible.push("#present".to_string());
        }

        // First candidate misses, second hits.
        let fallback = SelectorSpec::css("#missing").or_role("button", "Easy Apply");
        let handle = session.locate(&fallback).await.unwrap();
        assert_eq!(handle.selector(), "role:button:Easy Apply");

        // Both candidates hit: the earlier one wins.
        let both = SelectorSpec::css("#present").or_role("button", "Easy Apply");
        assert_eq!(session.locate(&both).await.unwrap().selector(), "#present");

        // Chain exhaustion is the typed miss.
        let miss = SelectorSpec::css("#missing").or_text("Apply now", false);
        let err = session.locate(&miss).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
