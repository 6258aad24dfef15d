use std::fmt;

use uuid::Uuid;

/// Stable identifier for a job posting, derived from its canonical URL so
/// dedup survives across runs without a server-assigned id.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PostingId(pub String);

impl PostingId {
    /// Derive the id from a posting URL: query string, fragment and any
    /// trailing slash are stripped so tracking parameters never split one
    /// posting into two ledger entries.
    pub fn from_url(url: &str) -> Self {
        let trimmed = url.trim();
        let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
        let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
        let canonical = without_query.trim_end_matches('/');
        if canonical.is_empty() {
            Self(trimmed.to_string())
        } else {
            Self(canonical.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one orchestrated batch, used as logging context.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job posting as surfaced by one search. Transient; never persisted.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Posting {
    pub id: PostingId,
    pub url: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub quick_apply: bool,
}

/// Terminal outcome of processing one posting.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ApplyStatus {
    /// Submission confirmed by the platform.
    Applied,
    /// Submission attempted but never confirmed; recorded anyway so a later
    /// run cannot double-apply.
    Partial,
    /// Nothing was submitted (no quick-apply affordance, already recorded,
    /// or the modal offered no submit control).
    Skipped,
    /// The flow errored before a submission attempt.
    Failed,
}

impl ApplyStatus {
    /// Only confirmed and unconfirmed submissions may enter the ledger.
    pub fn is_recordable(self) -> bool {
        matches!(self, ApplyStatus::Applied | ApplyStatus::Partial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApplyStatus::Applied => "applied",
            ApplyStatus::Partial => "partial",
            ApplyStatus::Skipped => "skipped",
            ApplyStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One search request: ordered keywords plus a location.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    pub location: String,
}

impl SearchQuery {
    pub fn new(keywords: Vec<String>, location: impl Into<String>) -> Self {
        Self {
            keywords,
            location: location.into(),
        }
    }
}

/// Per-batch outcome counters returned by the orchestrator.
///
/// `partial` stays separate from `applied` so unconfirmed submissions remain
/// visible for manual review; `ledger_write_failures > 0` flags persistence
/// risk without having aborted the batch.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    pub applied: usize,
    pub partial: usize,
    pub skipped: usize,
    pub failed: usize,
    pub ledger_write_failures: usize,
}

impl RunSummary {
    pub fn bump(&mut self, status: ApplyStatus) {
        match status {
            ApplyStatus::Applied => self.applied += 1,
            ApplyStatus::Partial => self.partial += 1,
            ApplyStatus::Skipped => self.skipped += 1,
            ApplyStatus::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &RunSummary) {
        self.applied += other.applied;
        self.partial += other.partial;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.ledger_write_failures += other.ledger_write_failures;
    }

    pub fn processed(&self) -> usize {
        self.applied + self.partial + self.skipped + self.failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "applied={} partial={} skipped={} failed={}",
            self.applied, self.partial, self.skipped, self.failed
        )?;
        if self.ledger_write_failures > 0 {
            write!(f, " ledger_write_failures={}", self.ledger_write_failures)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posting_id_strips_query_fragment_and_trailing_slash() {
        let a = PostingId::from_url("https://jobs.example.com/view/12345/?ref=search&pos=2");
        let b = PostingId::from_url("https://jobs.example.com/view/12345#apply");
        let c = PostingId::from_url("https://jobs.example.com/view/12345");
        assert_eq!(a, c);
        assert_eq!(b, c);
        assert_eq!(c.as_str(), "https://jobs.example.com/view/12345");
    }

    #[test]
    fn posting_id_keeps_raw_value_when_nothing_remains() {
        let id = PostingId::from_url("///");
        assert_eq!(id.as_str(), "///");
    }

    #[test]
    fn only_submission_outcomes_are_recordable() {
        assert!(ApplyStatus::Applied.is_recordable());
        assert!(ApplyStatus::Partial.is_recordable());
        assert!(!ApplyStatus::Skipped.is_recordable());
        assert!(!ApplyStatus::Failed.is_recordable());
    }

    #[test]
    fn summary_bump_and_merge_count_each_status() {
        let mut summary = RunSummary::default();
        summary.bump(ApplyStatus::Applied);
        summary.bump(ApplyStatus::Partial);
        summary.bump(ApplyStatus::Skipped);
        summary.bump(ApplyStatus::Failed);
        assert_eq!(summary.processed(), 4);

        let mut total = RunSummary::default();
        total.merge(&summary);
        total.merge(&summary);
        assert_eq!(total.applied, 2);
        assert_eq!(total.failed, 2);
        assert_eq!(total.processed(), 8);
    }
}
