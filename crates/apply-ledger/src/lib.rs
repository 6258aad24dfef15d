//! Application ledger: the durable set of postings already submitted to,
//! keyed by posting id. This is the engine's only cross-run memory, so reads
//! degrade instead of failing; a corrupt ledger must never wedge a batch.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use autoapply_core_types::{ApplyStatus, Posting, PostingId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unreadable at {path}: {detail}")]
    Unreadable { path: PathBuf, detail: String },
    #[error("ledger write failed at {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One persisted submission. Only `applied` and `partial` outcomes become
/// records; skips and failures stay out so they remain retryable later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub posting_id: PostingId,
    pub url: String,
    pub status: ApplyStatus,
    pub recorded_at: DateTime<Utc>,
}

impl ApplicationRecord {
    pub fn new(posting: &Posting, status: ApplyStatus) -> Self {
        Self {
            posting_id: posting.id.clone(),
            url: posting.url.clone(),
            status,
            recorded_at: Utc::now(),
        }
    }
}

fn default_version() -> u32 {
    LEDGER_VERSION
}

#[derive(Deserialize)]
struct LedgerFile {
    #[serde(default = "default_version")]
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    records: Vec<ApplicationRecord>,
}

#[derive(Serialize)]
struct LedgerFileRef<'a> {
    version: u32,
    records: &'a [ApplicationRecord],
}

/// In-memory ledger with a posting-id index, backed by one JSON document.
/// Every append persists the whole document atomically before returning.
pub struct Ledger {
    path: PathBuf,
    records: Vec<ApplicationRecord>,
    index: HashSet<PostingId>,
}

impl Ledger {
    /// Open the ledger at `path`. Never errors: a missing file starts empty
    /// and an unreadable one is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match read_records(&path) {
            Ok(records) => records,
            Err(err) => {
                warn!(target: "apply-ledger", %err, "starting with an empty ledger");
                Vec::new()
            }
        };
        let index = records
            .iter()
            .map(|record| record.posting_id.clone())
            .collect();
        debug!(
            target: "apply-ledger",
            path = %path.display(),
            records = records.len(),
            "ledger loaded"
        );
        Self {
            path,
            records,
            index,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &PostingId) -> bool {
        self.index.contains(id)
    }

    /// Append and persist one record. A posting already present is left
    /// untouched; non-submission statuses are refused at this boundary.
    ///
    /// On a failed persist the entry stays in memory, so the running batch
    /// still dedups against it; the caller decides how loudly to surface
    /// the persistence risk.
    pub fn record(&mut self, entry: ApplicationRecord) -> Result<(), LedgerError> {
        if !entry.status.is_recordable() {
            warn!(
                target: "apply-ledger",
                posting = %entry.posting_id,
                status = %entry.status,
                "refusing to record a non-submission status"
            );
            return Ok(());
        }
        if self.index.contains(&entry.posting_id) {
            debug!(
                target: "apply-ledger",
                posting = %entry.posting_id,
                "posting already recorded"
            );
            return Ok(());
        }

        self.index.insert(entry.posting_id.clone());
        self.records.push(entry);
        self.persist()
    }

    pub fn records(&self) -> &[ApplicationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self) -> Result<(), LedgerError> {
        let document = LedgerFileRef {
            version: LEDGER_VERSION,
            records: &self.records,
        };
        let data = serde_json::to_vec_pretty(&document)?;
        write_atomic(&self.path, &data)
    }
}

fn read_records(path: &Path) -> Result<Vec<ApplicationRecord>, LedgerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read(path).map_err(|err| LedgerError::Unreadable {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;
    let file: LedgerFile =
        serde_json::from_slice(&raw).map_err(|err| LedgerError::Unreadable {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
    Ok(file.records)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), LedgerError> {
    let io = |source| LedgerError::WriteFailure {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io)?;
        }
    }
    let tmp = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .map_err(io)?;
    file.write_all(data).map_err(io)?;
    file.sync_all().map_err(io)?;
    fs::rename(&tmp, path).map_err(io)?;
    Ok(())
}
