use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes surfaced by a [`crate::BrowserSession`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Error)]
pub enum PortErrorKind {
    #[error("browser launch failed")]
    LaunchFailed,
    #[error("navigation timed out")]
    NavTimeout,
    #[error("wait timed out")]
    WaitTimeout,
    #[error("element not found")]
    ElementNotFound,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("page closed")]
    PageClosed,
    #[error("protocol error")]
    Protocol,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to the engine layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortError {
    pub kind: PortErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for PortError {}

impl PortError {
    pub fn new(kind: PortErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            PortErrorKind::NavTimeout | PortErrorKind::WaitTimeout
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == PortErrorKind::ElementNotFound
    }
}
