//! Per-posting application state machine. One posting in, one terminal
//! state out, and a cleanup step that always runs so a stuck dialog can
//! never block the postings after it.

use std::sync::Arc;

use autoapply_core_types::{ApplyStatus, Posting};
use browser_port::{BrowserSession, WaitCondition};
use tracing::{debug, info, warn};

use crate::errors::PostingError;
use crate::selectors::PlatformProfile;

/// States of the quick-apply flow. `NoQuickApply`, `Confirmed`,
/// `Unconfirmed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApplyState {
    Discovered,
    QuickApplyAvailable,
    ModalOpened,
    SubmitAttempted,
    NoQuickApply,
    Confirmed,
    Unconfirmed,
    Failed,
}

impl ApplyState {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyState::Discovered => "discovered",
            ApplyState::QuickApplyAvailable => "quick-apply-available",
            ApplyState::ModalOpened => "modal-opened",
            ApplyState::SubmitAttempted => "submit-attempted",
            ApplyState::NoQuickApply => "no-quick-apply",
            ApplyState::Confirmed => "confirmed",
            ApplyState::Unconfirmed => "unconfirmed",
            ApplyState::Failed => "failed",
        }
    }
}

/// Terminal result of one posting: the state reached, the ledger/summary
/// status it maps to, and the fault that ended it (if any).
#[derive(Debug)]
pub struct PostingOutcome {
    pub state: ApplyState,
    pub status: ApplyStatus,
    pub error: Option<PostingError>,
}

impl PostingOutcome {
    fn clean(state: ApplyState, status: ApplyStatus) -> Self {
        Self {
            state,
            status,
            error: None,
        }
    }

    fn flagged(state: ApplyState, status: ApplyStatus, error: PostingError) -> Self {
        Self {
            state,
            status,
            error: Some(error),
        }
    }
}

pub struct ApplyFlow {
    profile: Arc<PlatformProfile>,
}

impl ApplyFlow {
    pub fn new(profile: Arc<PlatformProfile>) -> Self {
        Self { profile }
    }

    /// Drive one posting to a terminal state. Never returns an error: faults
    /// become a `Failed` outcome carrying the fault, and the modal cleanup
    /// runs no matter which state the flow ended in.
    pub async fn run(&self, session: &dyn BrowserSession, posting: &Posting) -> PostingOutcome {
        let result = self.drive(session, posting).await;
        self.close_modal(session).await;
        match result {
            Ok(outcome) => outcome,
            Err(err) => PostingOutcome::flagged(ApplyState::Failed, ApplyStatus::Failed, err),
        }
    }

    async fn drive(
        &self,
        session: &dyn BrowserSession,
        posting: &Posting,
    ) -> Result<PostingOutcome, PostingError> {
        let waits = &self.profile.waits;

        session.navigate(&posting.url, waits.nav()).await?;
        debug!(target: "apply-engine", posting = %posting.id, state = ApplyState::Discovered.as_str(), "posting opened");

        // Discovered -> QuickApplyAvailable | NoQuickApply. The card badge
        // is only a hint; the posting page is authoritative.
        let trigger_visible =
            WaitCondition::ElementVisible(self.profile.quick_apply_trigger.clone());
        match session.wait_for(&trigger_visible, waits.trigger()).await {
            Ok(()) => {}
            Err(err) if err.is_timeout() => {
                debug!(target: "apply-engine", posting = %posting.id, "no quick-apply control");
                return Ok(PostingOutcome::clean(
                    ApplyState::NoQuickApply,
                    ApplyStatus::Skipped,
                ));
            }
            Err(err) => return Err(PostingError::Session(err)),
        }

        // QuickApplyAvailable -> ModalOpened.
        let trigger = match session.locate(&self.profile.quick_apply_trigger).await {
            Ok(handle) => handle,
            Err(err) if err.is_not_found() => {
                return Ok(PostingOutcome::clean(
                    ApplyState::NoQuickApply,
                    ApplyStatus::Skipped,
                ));
            }
            Err(err) => return Err(PostingError::Session(err)),
        };
        session.click(&trigger).await?;

        let modal_visible = WaitCondition::ElementVisible(self.profile.modal.clone());
        match session.wait_for(&modal_visible, waits.modal()).await {
            Ok(()) => {}
            Err(err) if err.is_timeout() => return Err(PostingError::ModalNotFound),
            Err(err) => return Err(PostingError::Session(err)),
        }
        debug!(target: "apply-engine", posting = %posting.id, state = ApplyState::ModalOpened.as_str(), "modal open");

        // ModalOpened -> SubmitAttempted. A modal with no submit control is
        // left untouched: nothing was submitted, so nothing is recorded.
        let submit = match session.locate(&self.profile.modal_submit).await {
            Ok(handle) => handle,
            Err(err) if err.is_not_found() => {
                info!(
                    target: "apply-engine",
                    posting = %posting.id,
                    "modal offers no submit control; leaving posting untouched"
                );
                return Ok(PostingOutcome::flagged(
                    ApplyState::Unconfirmed,
                    ApplyStatus::Skipped,
                    PostingError::SubmitControlMissing,
                ));
            }
            Err(err) => return Err(PostingError::Session(err)),
        };
        session.click(&submit).await?;
        debug!(target: "apply-engine", posting = %posting.id, state = ApplyState::SubmitAttempted.as_str(), "submission triggered");

        // SubmitAttempted -> Confirmed | Unconfirmed. Once the submission
        // was triggered, every failure records `partial`: the platform may
        // have accepted it, and a duplicate application is the worse outcome.
        let confirmed =
            WaitCondition::ElementVisible(self.profile.confirmation_marker.clone());
        match session.wait_for(&confirmed, waits.confirmation()).await {
            Ok(()) => Ok(PostingOutcome::clean(
                ApplyState::Confirmed,
                ApplyStatus::Applied,
            )),
            Err(err) if err.is_timeout() => {
                warn!(
                    target: "apply-engine",
                    posting = %posting.id,
                    "submission not confirmed within budget; recording partial for review"
                );
                Ok(PostingOutcome::flagged(
                    ApplyState::Unconfirmed,
                    ApplyStatus::Partial,
                    PostingError::ConfirmationTimeout,
                ))
            }
            Err(err) => {
                warn!(
                    target: "apply-engine",
                    posting = %posting.id,
                    %err,
                    "session fault after submission; recording partial for review"
                );
                Ok(PostingOutcome::flagged(
                    ApplyState::Unconfirmed,
                    ApplyStatus::Partial,
                    PostingError::Session(err),
                ))
            }
        }
    }

    /// Dismiss whatever dialog is still open: dismiss control first, Escape
    /// as fallback, then the discard confirmation when the platform asks
    /// whether to throw the draft away. Nothing here may fail the posting.
    async fn close_modal(&self, session: &dyn BrowserSession) {
        match session.locate(&self.profile.modal_dismiss).await {
            Ok(handle) => {
                if let Err(err) = session.click(&handle).await {
                    debug!(target: "apply-engine", %err, "modal dismiss click failed");
                }
            }
            Err(err) => {
                debug!(target: "apply-engine", %err, "no dismiss control; sending escape");
                if let Err(err) = session.press_key("Escape").await {
                    debug!(target: "apply-engine", %err, "escape dispatch failed");
                }
            }
        }

        match session.locate(&self.profile.modal_discard).await {
            Ok(handle) => {
                if let Err(err) = session.click(&handle).await {
                    debug!(target: "apply-engine", %err, "discard confirmation click failed");
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                debug!(target: "apply-engine", %err, "discard lookup failed");
            }
        }
    }
}
