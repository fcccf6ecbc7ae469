//! Dispatch entities - one import shipment per record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

/// Unique identifier for a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchId(pub Uuid);

impl From<Uuid> for DispatchId {
    fn from(uuid: Uuid) -> Self {
        DispatchId(uuid)
    }
}

impl std::ops::Deref for DispatchId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for DispatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Unique identifier for the company a dispatch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub Uuid);

impl From<Uuid> for CompanyId {
    fn from(uuid: Uuid) -> Self {
        CompanyId(uuid)
    }
}

impl std::fmt::Display for CompanyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Human-readable dispatch number, the key product lines reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchNumber(pub String);

impl DispatchNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DispatchNumber {
    fn from(s: &str) -> Self {
        DispatchNumber(s.to_string())
    }
}

impl From<String> for DispatchNumber {
    fn from(s: String) -> Self {
        DispatchNumber(s)
    }
}

impl std::fmt::Display for DispatchNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a dispatch.
///
/// Status only ever advances within an allocation run: `new`/`pending` move to
/// `completed` at commit, never backward. A `completed` dispatch can be
/// re-opened for review, but re-committing requires re-running the full
/// allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "text", rename_all = "lowercase")
)]
pub enum DispatchStatus {
    /// Not yet created upstream
    New,
    /// Products loaded, costs not yet run
    Pending,
    Open,
    Completed,
}

impl DispatchStatus {
    /// Whether selecting a dispatch in this status resumes straight at cost
    /// entry (the upload already happened).
    pub fn resumes_at_costs(&self) -> bool {
        matches!(self, DispatchStatus::Pending | DispatchStatus::Completed)
    }

    /// Whether a stored dispatch may move to `next`. Completion is terminal:
    /// a completed dispatch is only ever written as completed again (a
    /// re-run), never back to an earlier status.
    pub fn allows_transition_to(&self, next: DispatchStatus) -> bool {
        !matches!(self, DispatchStatus::Completed) || next == DispatchStatus::Completed
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::New => "new",
            DispatchStatus::Pending => "pending",
            DispatchStatus::Open => "open",
            DispatchStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One import shipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: DispatchId,
    pub number: DispatchNumber,
    pub origin: String,
    pub description: Option<String>,
    pub status: DispatchStatus,
    /// Company the dispatch belongs to. Resolution is mandatory at creation.
    pub company_id: Option<CompanyId>,
    /// Foreign-currency FOB total, reported by the ingestion service.
    pub total_fob_usd: Money,
    /// Local-currency FOB total, set only at commit.
    pub total_fob_ars: Option<Money>,
    pub created_at: DateTime<Utc>,
}

/// Input parameters for creating a new dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchDraft {
    pub number: DispatchNumber,
    pub origin: String,
    pub description: Option<String>,
    pub company_id: Option<CompanyId>,
}

/// One page of dispatch search results.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchPage {
    pub rows: Vec<Dispatch>,
    pub total_count: i64,
}

/// A dispatch's own FOB subtotals, foreign and converted, recorded at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FobTotals {
    pub foreign: Money,
    pub local: Money,
}
