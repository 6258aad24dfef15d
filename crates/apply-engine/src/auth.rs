//! Auth manager: restore a stored session when possible, fall back to
//! credential login, and persist the refreshed cookie jar for next time.

use std::sync::Arc;
use std::time::Duration;

use browser_port::{BrowserSession, PortError, SelectorSpec, WaitCondition};
use session_vault::{SessionToken, Vault};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::credentials::CredentialsSource;
use crate::errors::AuthError;
use crate::selectors::PlatformProfile;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which path produced the authenticated session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthSuccess {
    ReusedSession,
    FreshLogin,
}

impl AuthSuccess {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthSuccess::ReusedSession => "reused-session",
            AuthSuccess::FreshLogin => "fresh-login",
        }
    }
}

pub struct AuthManager<C> {
    vault: Vault,
    credentials: C,
    profile: Arc<PlatformProfile>,
}

impl<C: CredentialsSource> AuthManager<C> {
    pub fn new(vault: Vault, credentials: C, profile: Arc<PlatformProfile>) -> Self {
        Self {
            vault,
            credentials,
            profile,
        }
    }

    /// Establish an authenticated session. Never panics; every failure mode
    /// is a typed [`AuthError`] and the caller decides whether the batch
    /// dies with it.
    pub async fn attempt_login(
        &self,
        session: &dyn BrowserSession,
    ) -> Result<AuthSuccess, AuthError> {
        if let Some(token) = self.vault.load() {
            if !token.is_empty() {
                match self.try_reuse(session, &token).await {
                    Ok(true) => {
                        info!(
                            target: "apply-engine",
                            saved_at = %token.saved_at,
                            "stored session is still valid"
                        );
                        return Ok(AuthSuccess::ReusedSession);
                    }
                    Ok(false) => {
                        info!(
                            target: "apply-engine",
                            "stored session rejected; falling back to credential login"
                        );
                        if let Err(err) = self.vault.clear() {
                            warn!(target: "apply-engine", %err, "could not clear stale session");
                        }
                    }
                    Err(err) => return Err(AuthError::Session(err)),
                }
            }
        }
        self.credential_login(session).await
    }

    /// Inject the stored cookies, load a known authenticated page and check
    /// whether the platform keeps us there. A probe timeout means the token
    /// is stale, not that the run is broken.
    async fn try_reuse(
        &self,
        session: &dyn BrowserSession,
        token: &SessionToken,
    ) -> Result<bool, PortError> {
        session.set_cookies(&token.cookie_params()).await?;

        if let Err(err) = session
            .navigate(&self.profile.home_url, self.profile.waits.nav())
            .await
        {
            if err.is_timeout() {
                return Ok(false);
            }
            return Err(err);
        }

        let probe = WaitCondition::UrlContainsAny(self.profile.authenticated_markers.clone());
        match session.wait_for(&probe, self.profile.waits.login()).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_timeout() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn credential_login(
        &self,
        session: &dyn BrowserSession,
    ) -> Result<AuthSuccess, AuthError> {
        let creds = self.credentials.credentials()?;
        info!(target: "apply-engine", username = %creds.username, "performing credential login");

        session
            .navigate(&self.profile.login_url, self.profile.waits.nav())
            .await?;

        let username_field = session.locate(&self.profile.username_field).await?;
        session.fill(&username_field, &creds.username).await?;
        let password_field = session.locate(&self.profile.password_field).await?;
        session.fill(&password_field, creds.secret()).await?;
        let submit = session.locate(&self.profile.login_submit).await?;
        session.click(&submit).await?;

        self.classify_login(session).await?;
        self.persist_session(session).await;
        Ok(AuthSuccess::FreshLogin)
    }

    /// After submitting credentials the page lands in one of three worlds:
    /// authenticated, rejected, or challenged. Poll until one is recognized
    /// or the login budget runs out.
    async fn classify_login(&self, session: &dyn BrowserSession) -> Result<(), AuthError> {
        let deadline = Instant::now() + self.profile.waits.login();
        loop {
            let url = session.current_url().await.map_err(AuthError::Session)?;

            if self
                .profile
                .authenticated_markers
                .iter()
                .any(|marker| url.contains(marker.as_str()))
            {
                return Ok(());
            }
            if self
                .profile
                .challenge_url_fragments
                .iter()
                .any(|fragment| url.contains(fragment.as_str()))
            {
                return Err(AuthError::Blocked);
            }
            if self
                .marker_present(session, &self.profile.challenge_marker)
                .await
                .map_err(AuthError::Session)?
            {
                return Err(AuthError::Blocked);
            }
            if self
                .marker_present(session, &self.profile.login_failure_marker)
                .await
                .map_err(AuthError::Session)?
            {
                return Err(AuthError::InvalidCredentials);
            }

            if Instant::now() >= deadline {
                return Err(AuthError::LoginTimeout);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn marker_present(
        &self,
        session: &dyn BrowserSession,
        spec: &SelectorSpec,
    ) -> Result<bool, PortError> {
        match session.locate(spec).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Capture the cookie jar and overwrite the vault. Failure here costs a
    /// future reuse, not this login, so it only warns.
    async fn persist_session(&self, session: &dyn BrowserSession) {
        match session.cookies().await {
            Ok(cookies) => {
                let token = SessionToken::from_cookies(cookies);
                match self.vault.store(&token) {
                    Ok(()) => {
                        debug!(
                            target: "apply-engine",
                            cookies = token.cookies.len(),
                            "session stored for reuse"
                        );
                    }
                    Err(err) => {
                        warn!(
                            target: "apply-engine",
                            %err,
                            "session not stored; next run will log in again"
                        );
                    }
                }
            }
            Err(err) => {
                warn!(
                    target: "apply-engine",
                    %err,
                    "could not capture cookies after login"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{first_css, Event, FakeSession, FixedCredentials};
    use browser_port::CookieParam;

    fn manager(dir: &std::path::Path, profile: &Arc<PlatformProfile>) -> AuthManager<FixedCredentials> {
        AuthManager::new(
            Vault::new(dir.join("session.json")),
            FixedCredentials::ok("jane@example.com", "hunter2"),
            profile.clone(),
        )
    }

    fn stored_token(dir: &std::path::Path) -> Vault {
        let vault = Vault::new(dir.join("session.json"));
        vault
            .store(&SessionToken::from_cookies(vec![CookieParam::new(
                "li_at", "stored",
            )]))
            .unwrap();
        vault
    }

    fn fast_profile() -> Arc<PlatformProfile> {
        let mut profile = PlatformProfile::default();
        profile.waits.login_ms = 150;
        Arc::new(profile)
    }

    #[tokio::test]
    async fn valid_stored_session_is_reused_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let profile = fast_profile();
        stored_token(dir.path());

        let session = FakeSession::new(&profile);
        // Landing on the home URL keeps us there: the session is valid.
        session.redirect(&profile.home_url, "https://www.platform.example/feed/");

        let auth = manager(dir.path(), &profile);
        let outcome = auth.attempt_login(&session).await.unwrap();

        assert_eq!(outcome, AuthSuccess::ReusedSession);
        let journal = session.journal();
        assert!(journal.contains(&Event::SetCookies(1)));
        assert!(!journal.iter().any(|e| matches!(e, Event::Fill { .. })));
    }

    #[tokio::test]
    async fn rejected_token_falls_back_to_fresh_login() {
        let dir = tempfile::tempdir().unwrap();
        let profile = fast_profile();
        let vault = stored_token(dir.path());

        let session = FakeSession::new(&profile);
        // The platform bounces the stale cookie jar to the guest login page.
        session.redirect(&profile.home_url, "https://www.platform.example/login");
        session.on_click_set_url(
            &profile.login_submit,
            "https://www.platform.example/feed/",
        );
        session.set_cookie_jar(vec![CookieParam::new("li_at", "fresh")]);

        let auth = manager(dir.path(), &profile);
        let outcome = auth.attempt_login(&session).await.unwrap();

        assert_eq!(outcome, AuthSuccess::FreshLogin);
        // Username is typed before the password, then the submit is clicked.
        let journal = session.journal();
        let fill_user = journal
            .iter()
            .position(|e| matches!(e, Event::Fill { text, .. } if text == "jane@example.com"))
            .unwrap();
        let fill_pass = journal
            .iter()
            .position(|e| matches!(e, Event::Fill { text, .. } if text == "hunter2"))
            .unwrap();
        let click = journal
            .iter()
            .position(|e| matches!(e, Event::Click(key) if key == &first_css(&profile.login_submit)))
            .unwrap();
        assert!(fill_user < fill_pass && fill_pass < click);

        // The fresh jar replaced the stale token.
        let token = vault.load().unwrap();
        assert_eq!(token.cookies[0].value, "fresh");
    }

    #[tokio::test]
    async fn missing_credentials_surface_before_touching_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let profile = fast_profile();
        let session = FakeSession::new(&profile);

        let auth = AuthManager::new(
            Vault::new(dir.path().join("session.json")),
            FixedCredentials::missing(),
            profile.clone(),
        );
        let err = auth.attempt_login(&session).await.unwrap_err();

        assert!(matches!(err, AuthError::MissingCredentials));
        assert!(session.journal().is_empty());
    }

    #[tokio::test]
    async fn login_failure_marker_means_invalid_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let profile = fast_profile();
        let session = FakeSession::new(&profile);
        session.on_click_show(&profile.login_submit, &profile.login_failure_marker);

        let auth = manager(dir.path(), &profile);
        let err = auth.attempt_login(&session).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn challenge_url_means_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let profile = fast_profile();
        let session = FakeSession::new(&profile);
        session.on_click_set_url(
            &profile.login_submit,
            "https://www.platform.example/checkpoint/challenge/",
        );

        let auth = manager(dir.path(), &profile);
        let err = auth.attempt_login(&session).await.unwrap_err();
        assert!(matches!(err, AuthError::Blocked));
    }

    #[tokio::test]
    async fn unclassified_login_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let profile = fast_profile();
        // Submit click has no effect: the page never resolves either way.
        let session = FakeSession::new(&profile);

        let auth = manager(dir.path(), &profile);
        let err = auth.attempt_login(&session).await.unwrap_err();
        assert!(matches!(err, AuthError::LoginTimeout));
    }

    #[tokio::test]
    async fn vault_write_failure_does_not_fail_the_login() {
        let dir = tempfile::tempdir().unwrap();
        let profile = fast_profile();
        let session = FakeSession::new(&profile);
        session.on_click_set_url(
            &profile.login_submit,
            "https://www.platform.example/feed/",
        );

        // A directory where the vault file should be makes every store fail.
        let clash = dir.path().join("session.json");
        std::fs::create_dir_all(&clash).unwrap();

        let auth = AuthManager::new(
            Vault::new(&clash),
            FixedCredentials::ok("jane@example.com", "hunter2"),
            profile.clone(),
        );
        let outcome = auth.attempt_login(&session).await.unwrap();
        assert_eq!(outcome, AuthSuccess::FreshLogin);
    }
}
