//! The application engine: everything between "we have a browser" and "the
//! batch is done".
//!
//! [`AuthManager`] establishes an authenticated session (vault reuse first,
//! credential login second), [`SearchExecutor`] turns a query into postings,
//! [`ApplyFlow`] walks one posting through the quick-apply state machine,
//! and [`Orchestrator`] runs the whole loop with dedup, capping, pacing and
//! cancellation. All browser access goes through the
//! [`browser_port::BrowserSession`] trait, which is what makes the engine
//! testable against a scripted fake.

pub mod auth;
pub mod credentials;
pub mod errors;
pub mod flow;
pub mod orchestrator;
pub mod search;
pub mod selectors;

#[cfg(test)]
mod testkit;

pub use auth::{AuthManager, AuthSuccess};
pub use credentials::{Credentials, CredentialsSource, EnvCredentialsSource};
pub use errors::{AuthError, BatchError, PostingError, SearchError};
pub use flow::{ApplyFlow, ApplyState, PostingOutcome};
pub use orchestrator::{BatchReport, Orchestrator};
pub use search::SearchExecutor;
pub use selectors::{PlatformProfile, ProfileError, WaitBudgets};
