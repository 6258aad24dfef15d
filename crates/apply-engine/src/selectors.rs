//! Platform profiles: every platform-specific selector, URL and wait budget
//! in one data structure. The built-in default targets the platform's
//! current public DOM; a YAML file can retarget everything without touching
//! code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use browser_port::SelectorSpec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile unreadable at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("profile invalid: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Bounded-wait budgets in milliseconds. Expiry of any of these is a state
/// transition, never a crash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitBudgets {
    pub nav_ms: u64,
    pub login_ms: u64,
    pub search_ms: u64,
    pub trigger_ms: u64,
    pub modal_ms: u64,
    pub confirmation_ms: u64,
}

impl Default for WaitBudgets {
    fn default() -> Self {
        Self {
            nav_ms: 20_000,
            login_ms: 15_000,
            search_ms: 10_000,
            trigger_ms: 2_000,
            modal_ms: 2_000,
            confirmation_ms: 5_000,
        }
    }
}

impl WaitBudgets {
    pub fn nav(&self) -> Duration {
        Duration::from_millis(self.nav_ms)
    }

    pub fn login(&self) -> Duration {
        Duration::from_millis(self.login_ms)
    }

    pub fn search(&self) -> Duration {
        Duration::from_millis(self.search_ms)
    }

    pub fn trigger(&self) -> Duration {
        Duration::from_millis(self.trigger_ms)
    }

    pub fn modal(&self) -> Duration {
        Duration::from_millis(self.modal_ms)
    }

    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }
}

/// Everything the engine needs to know about one job platform's UI. Each
/// selector is a fallback chain; the platform reworks its DOM often enough
/// that single selectors rot within months.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformProfile {
    pub name: String,

    pub login_url: String,
    /// Known authenticated page used to probe a restored session.
    pub home_url: String,
    /// URL fragments that classify a page as authenticated.
    pub authenticated_markers: Vec<String>,
    /// URL fragments that classify a page as a verification challenge.
    pub challenge_url_fragments: Vec<String>,

    pub username_field: SelectorSpec,
    pub password_field: SelectorSpec,
    pub login_submit: SelectorSpec,
    pub login_failure_marker: SelectorSpec,
    pub challenge_marker: SelectorSpec,

    pub search_url: String,
    pub keywords_param: String,
    pub location_param: String,
    pub results_container: SelectorSpec,
    pub result_card: SelectorSpec,
    pub card_title: SelectorSpec,
    pub card_company: SelectorSpec,
    pub card_location: SelectorSpec,
    pub card_link: SelectorSpec,
    pub card_quick_apply_badge: SelectorSpec,

    pub quick_apply_trigger: SelectorSpec,
    pub modal: SelectorSpec,
    pub modal_submit: SelectorSpec,
    pub modal_dismiss: SelectorSpec,
    pub modal_discard: SelectorSpec,
    pub confirmation_marker: SelectorSpec,

    pub waits: WaitBudgets,
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),

            login_url: "https://www.platform.example/login".to_string(),
            home_url: "https://www.platform.example/feed/".to_string(),
            authenticated_markers: vec!["/feed".to_string()],
            challenge_url_fragments: vec!["/checkpoint/".to_string(), "/challenge/".to_string()],

            username_field: SelectorSpec::css("#username")
                .or_css("input[name='session_key']")
                .or_css("input[autocomplete='username']"),
            password_field: SelectorSpec::css("#password")
                .or_css("input[name='session_password']")
                .or_css("input[type='password']"),
            login_submit: SelectorSpec::css("button[type='submit']")
                .or_role("button", "Sign in"),
            login_failure_marker: SelectorSpec::css("#error-for-password")
                .or_css("#error-for-username")
                .or_css(".form__label--error"),
            challenge_marker: SelectorSpec::css("#captcha-internal")
                .or_css(".challenge-dialog")
                .or_text("security check", false),

            search_url: "https://www.platform.example/jobs/search/".to_string(),
            keywords_param: "keywords".to_string(),
            location_param: "location".to_string(),
            results_container: SelectorSpec::css(".jobs-search-results-list")
                .or_css("ul.jobs-search__results-list")
                .or_css(".scaffold-layout__list"),
            result_card: SelectorSpec::css("li.jobs-search-results__list-item")
                .or_css("li.job-search-card")
                .or_css("li[data-occludable-job-id]"),
            card_title: SelectorSpec::css(".job-card-list__title")
                .or_css("h3.base-search-card__title")
                .or_css(".artdeco-entity-lockup__title"),
            card_company: SelectorSpec::css(".job-card-container__primary-description")
                .or_css("h4.base-search-card__subtitle")
                .or_css(".artdeco-entity-lockup__subtitle"),
            card_location: SelectorSpec::css(".job-card-container__metadata-item")
                .or_css(".job-search-card__location"),
            card_link: SelectorSpec::css("a.job-card-list__title")
                .or_css("a.base-card__full-link")
                .or_css("a[href*='/jobs/view/']"),
            card_quick_apply_badge: SelectorSpec::css(".job-card-container__apply-method")
                .or_text("Easy Apply", false),

            quick_apply_trigger: SelectorSpec::css(".jobs-apply-button")
                .or_role("button", "Easy Apply")
                .or_text("Easy Apply", false),
            modal: SelectorSpec::css(".jobs-easy-apply-modal")
                .or_css("div[data-test-modal]")
                .or_role("dialog", "apply"),
            modal_submit: SelectorSpec::css("button[aria-label='Submit application']")
                .or_role("button", "Submit application")
                .or_text("Submit application", false),
            modal_dismiss: SelectorSpec::css("button[aria-label='Dismiss']")
                .or_css(".artdeco-modal__dismiss"),
            modal_discard: SelectorSpec::css("button[data-control-name='discard_application_confirm_btn']")
                .or_role("button", "Discard")
                .or_text("Discard", true),
            confirmation_marker: SelectorSpec::css(".artdeco-inline-feedback--success")
                .or_text("application was sent", false),

            waits: WaitBudgets::default(),
        }
    }
}

impl PlatformProfile {
    /// Load a profile from YAML. Fields absent from the file keep their
    /// built-in defaults, so a retargeting profile only lists what differs.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ProfileError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}
