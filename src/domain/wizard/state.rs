//! Wizard states for one allocation run.
//!
//! The three-step wizard (select dispatch group, upload documents, enter
//! costs and commit) is modeled with the typestate pattern: each step is a
//! distinct type parameter on `Wizard<S>`, so only the operations valid for
//! the current step exist at compile time. No combination of ad-hoc flags can
//! reach an ambiguous state.

use chrono::{DateTime, Utc};

use crate::commit::CommitSummary;
use crate::domain::dispatch::{Dispatch, DispatchNumber};
use crate::domain::pool::CostPool;
use crate::storage::RunId;

/// Marker trait for valid wizard states.
pub trait WizardState: Send + Sync {}

/// One allocation run moving through the wizard.
///
/// The run id is stable across all states; it identifies the run in logs and
/// serves as the lease holder at commit time.
#[derive(Debug)]
pub struct Wizard<S: WizardState> {
    pub run_id: RunId,
    pub state: S,
}

/// The one or two dispatches pooled for this run.
#[derive(Debug, Clone)]
pub struct DispatchGroup {
    pub primary: Dispatch,
    pub secondary: Option<Dispatch>,
}

impl DispatchGroup {
    pub fn single(primary: Dispatch) -> Self {
        DispatchGroup {
            primary,
            secondary: None,
        }
    }

    pub fn is_dual(&self) -> bool {
        self.secondary.is_some()
    }

    /// Dispatch numbers in the pool, primary first.
    pub fn numbers(&self) -> Vec<DispatchNumber> {
        let mut numbers = vec![self.primary.number.clone()];
        if let Some(secondary) = &self.secondary {
            numbers.push(secondary.number.clone());
        }
        numbers
    }

    /// Stable identity of the pool, independent of selection order. Names the
    /// pool in logs and in the commit recap; the exclusive leases are taken
    /// per dispatch, not per pool.
    pub fn pool_key(&self) -> String {
        let mut numbers: Vec<&str> = vec![self.primary.number.as_str()];
        if let Some(secondary) = &self.secondary {
            numbers.push(secondary.number.as_str());
        }
        numbers.sort_unstable();
        numbers.join("+")
    }
}

/// No dispatch chosen yet.
#[derive(Debug)]
pub struct SelectingPrimary;

/// Primary dispatch chosen; a secondary may still be paired or removed.
#[derive(Debug)]
pub struct GroupConfirmed {
    pub group: DispatchGroup,
    pub confirmed_at: DateTime<Utc>,
}

/// Documents being sent to the ingestion service, primary strictly first.
#[derive(Debug)]
pub struct Uploading {
    pub group: DispatchGroup,
    pub started_at: DateTime<Utc>,
}

/// Cost entry: the pool exists, categories and the exchange rate are being
/// filled in, margin awaits explicit review.
#[derive(Debug)]
pub struct EnteringCosts {
    pub group: DispatchGroup,
    pub pool: CostPool,
    /// True when this state was reached by resuming a pending/completed
    /// dispatch rather than by uploading. A resumed run is always
    /// single-dispatch: the original pairing is not persisted, so it is
    /// never guessed.
    pub resumed: bool,
    pub entered_at: DateTime<Utc>,
}

/// Terminal: prices written, dispatch statuses advanced.
#[derive(Debug)]
pub struct Committed {
    pub group: DispatchGroup,
    pub summary: CommitSummary,
    pub committed_at: DateTime<Utc>,
}

impl WizardState for SelectingPrimary {}
impl WizardState for GroupConfirmed {}
impl WizardState for Uploading {}
impl WizardState for EnteringCosts {}
impl WizardState for Committed {}

impl Wizard<SelectingPrimary> {
    /// Start a fresh allocation run.
    pub fn start() -> Self {
        Wizard {
            run_id: RunId::new(),
            state: SelectingPrimary,
        }
    }
}

impl Default for Wizard<SelectingPrimary> {
    fn default() -> Self {
        Self::start()
    }
}
