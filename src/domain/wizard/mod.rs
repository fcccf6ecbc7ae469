//! Dispatch aggregator - the allocation wizard.
//!
//! This module contains the state machine for one allocation run:
//! - Wizard states (typestate pattern)
//! - State transition methods
//! - Registry operations owned by the aggregator (create, cascade delete)

pub mod state;
pub mod transitions;

pub use state::{
    Committed, DispatchGroup, EnteringCosts, GroupConfirmed, SelectingPrimary, Uploading, Wizard,
    WizardState,
};
pub use transitions::{create_dispatch, delete_dispatch, CommitFailure, Selection};
