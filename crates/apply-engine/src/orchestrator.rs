//! Batch loop: authenticate once, search once, then walk the result list
//! through the per-posting flow with dedup, capping, pacing and cancellation.

use std::sync::Arc;
use std::time::Duration;

use apply_ledger::{ApplicationRecord, Ledger};
use autoapply_core_types::{ApplyStatus, BatchId, Posting, RunSummary, SearchQuery};
use browser_port::BrowserSession;
use rand::Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthManager, AuthSuccess};
use crate::credentials::CredentialsSource;
use crate::errors::BatchError;
use crate::flow::ApplyFlow;
use crate::search::SearchExecutor;
use crate::selectors::PlatformProfile;

/// Default pacing window between postings, in milliseconds.
const PACING_MS: (u64, u64) = (1_200, 3_500);

/// What one `run_batch` did, for the caller's report output.
#[derive(Clone, Debug)]
pub struct BatchReport {
    pub batch: BatchId,
    pub auth: AuthSuccess,
    pub postings_found: usize,
    pub summary: RunSummary,
}

/// Drives a batch over an authenticated session. The ledger is shared
/// behind a lock so concurrent batches dedup against each other, not just
/// against past runs.
pub struct Orchestrator {
    profile: Arc<PlatformProfile>,
    ledger: Arc<Mutex<Ledger>>,
    cancel: CancellationToken,
    pacing_ms: (u64, u64),
}

impl Orchestrator {
    pub fn new(profile: Arc<PlatformProfile>, ledger: Arc<Mutex<Ledger>>) -> Self {
        Self {
            profile,
            ledger,
            cancel: CancellationToken::new(),
            pacing_ms: PACING_MS,
        }
    }

    /// Cancelling the token stops the batch between postings; the posting
    /// in flight still finishes its cleanup.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_pacing(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.pacing_ms = (min_ms, max_ms);
        self
    }

    /// Full pipeline: login (or session reuse), search, then the posting
    /// loop. Auth and search failures abort the batch; nothing after them
    /// does.
    pub async fn run_batch<C: CredentialsSource>(
        &self,
        session: &dyn BrowserSession,
        auth: &AuthManager<C>,
        query: &SearchQuery,
        cap: Option<usize>,
    ) -> Result<BatchReport, BatchError> {
        let batch = BatchId::new();
        info!(
            target: "apply-engine",
            batch = %batch,
            keywords = ?query.keywords,
            location = %query.location,
            "starting batch"
        );

        let auth_outcome = auth.attempt_login(session).await?;
        let postings = SearchExecutor::new(self.profile.clone())
            .search(session, query)
            .await?;
        let summary = self.run(session, &postings, cap).await;

        info!(target: "apply-engine", batch = %batch, %summary, "batch finished");
        Ok(BatchReport {
            batch,
            auth: auth_outcome,
            postings_found: postings.len(),
            summary,
        })
    }

    /// Process postings in listing order. Every posting is isolated: its
    /// outcome lands in the summary and, when a submission happened, in the
    /// ledger, and the loop moves on regardless.
    pub async fn run(
        &self,
        session: &dyn BrowserSession,
        postings: &[Posting],
        cap: Option<usize>,
    ) -> RunSummary {
        let flow = ApplyFlow::new(self.profile.clone());
        let mut summary = RunSummary::default();
        let mut processed_any = false;

        for posting in postings {
            if let Some(cap) = cap {
                if summary.applied >= cap {
                    info!(
                        target: "apply-engine",
                        cap,
                        "application cap reached; leaving remaining postings untouched"
                    );
                    break;
                }
            }
            if self.cancel.is_cancelled() {
                info!(target: "apply-engine", "cancellation requested; returning partial summary");
                break;
            }

            {
                let ledger = self.ledger.lock().await;
                if ledger.contains(&posting.id) {
                    info!(
                        target: "apply-engine",
                        posting = %posting.id,
                        "already recorded in the ledger; skipping"
                    );
                    summary.bump(ApplyStatus::Skipped);
                    continue;
                }
            }

            if processed_any {
                self.pace().await;
                if self.cancel.is_cancelled() {
                    info!(
                        target: "apply-engine",
                        "cancellation requested; returning partial summary"
                    );
                    break;
                }
            }
            processed_any = true;

            let outcome = flow.run(session, posting).await;
            match &outcome.error {
                None => info!(
                    target: "apply-engine",
                    posting = %posting.id,
                    title = %posting.title,
                    state = outcome.state.as_str(),
                    status = outcome.status.as_str(),
                    "posting processed"
                ),
                Some(err) => warn!(
                    target: "apply-engine",
                    posting = %posting.id,
                    title = %posting.title,
                    state = outcome.state.as_str(),
                    status = outcome.status.as_str(),
                    error = %err,
                    "posting did not complete cleanly"
                ),
            }
            summary.bump(outcome.status);

            if outcome.status.is_recordable() {
                let entry = ApplicationRecord::new(posting, outcome.status);
                let mut ledger = self.ledger.lock().await;
                if let Err(err) = ledger.record(entry) {
                    error!(
                        target: "apply-engine",
                        posting = %posting.id,
                        %err,
                        "application happened but could not be recorded"
                    );
                    summary.ledger_write_failures += 1;
                }
            }
        }
        summary
    }

    /// Human-ish pause between postings. A cancellation during the pause
    /// wins immediately.
    async fn pace(&self) {
        let (min, max) = self.pacing_ms;
        if max == 0 {
            return;
        }
        let wait = if min >= max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        debug!(target: "apply-engine", delay_ms = wait, "pacing before next posting");
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
        }
    }
}
