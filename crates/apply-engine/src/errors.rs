//! Typed failure channels, one enum per layer. `PortError` is wrapped at
//! each boundary so the orchestrator loop never sees a raw transport fault.

use browser_port::PortError;
use thiserror::Error;

/// Login failure reasons. Any of these aborts the batch: the engine cannot
/// proceed unauthenticated.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials missing (set AUTOAPPLY_USERNAME and AUTOAPPLY_SECRET)")]
    MissingCredentials,
    #[error("platform rejected the credentials")]
    InvalidCredentials,
    #[error("login did not settle within the wait budget")]
    LoginTimeout,
    #[error("login blocked by a verification challenge")]
    Blocked,
    #[error("browser session fault during login: {0}")]
    Session(#[from] PortError),
}

/// Search failure reasons. A failed search ends the batch before any posting
/// is touched.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search results did not render within the wait budget")]
    NavigationTimeout,
    #[error("search returned no result cards")]
    NoResults,
    #[error("search url could not be built: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("browser session fault during search: {0}")]
    Session(#[from] PortError),
}

/// Per-posting faults. All of these are recovered locally: the posting is
/// counted and the loop moves on.
#[derive(Debug, Error)]
pub enum PostingError {
    #[error("quick-apply modal did not open")]
    ModalNotFound,
    #[error("modal offers no submit control")]
    SubmitControlMissing,
    #[error("no confirmation marker within the wait budget")]
    ConfirmationTimeout,
    #[error("result card missing {0}")]
    ExtractionFailure(&'static str),
    #[error("browser session fault: {0}")]
    Session(#[from] PortError),
}

/// Batch-aborting failures surfaced by `run_batch`.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("search failed: {0}")]
    Search(#[from] SearchError),
}
