//! Credential supply. The engine never stores credentials; it pulls them
//! from a [`CredentialsSource`] at login time and drops them after use.

use std::env;
use std::fmt;

use crate::errors::AuthError;

pub const USERNAME_VAR: &str = "AUTOAPPLY_USERNAME";
pub const SECRET_VAR: &str = "AUTOAPPLY_SECRET";

/// Username/secret pair. The secret never appears in `Debug` output, so a
/// logged credentials value cannot leak it.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Where credentials come from. The shipped implementation reads process
/// environment variables; tests substitute fixed values.
pub trait CredentialsSource: Send + Sync {
    fn credentials(&self) -> Result<Credentials, AuthError>;
}

/// Reads `AUTOAPPLY_USERNAME` / `AUTOAPPLY_SECRET`. Empty values count as
/// missing.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentialsSource;

impl CredentialsSource for EnvCredentialsSource {
    fn credentials(&self) -> Result<Credentials, AuthError> {
        let username = env::var(USERNAME_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty());
        let secret = env::var(SECRET_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty());
        match (username, secret) {
            (Some(username), Some(secret)) => Ok(Credentials::new(username, secret)),
            _ => Err(AuthError::MissingCredentials),
        }
    }
}
