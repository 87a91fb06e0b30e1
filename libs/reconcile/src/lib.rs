//! Reconciliation primitives.
//!
//! This library provides the pieces every resource kind uses to converge a
//! remote management appliance toward a caller-supplied desired state:
//!
//! - **Desired state**: What the caller asked for (fixed for one invocation).
//! - **Current state**: What the appliance reports (a read-only snapshot).
//! - **Convergence**: The minimal create/update/delete that makes them match.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - `changed` is true if and only if a mutation was applied
//! - Name lookups never pick between several matches

pub mod diff;
pub mod retry;

use serde::Serialize;
use thiserror::Error;

pub use diff::{compare, matches, update_body, Comparison, DriftSignal};
pub use retry::{with_retry, RetryError, RetryPolicy};

/// Reconciliation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// A symbolic reference matched no remote record.
    #[error("{kind} '{name}' not found")]
    ReferenceNotFound { kind: String, name: String },

    /// A symbolic reference matched more than one remote record.
    #[error("{count} {kind} records match '{name}'; refusing to pick one")]
    AmbiguousMatch {
        kind: String,
        name: String,
        count: usize,
    },

    /// Two desired entries target the same remote resource in one batch.
    #[error("{kind} '{key}' is targeted more than once in the same batch")]
    DuplicateTarget { kind: String, key: String },
}

/// Whether the caller wants the resource to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Present,
    Absent,
}

/// First step of the per-resource state machine.
///
/// Only `Compare` needs the normalized desired record; the other three
/// transitions are decided from existence alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing exists and nothing should.
    Noop,

    /// The resource is missing and should be created.
    Create,

    /// The resource exists and should; field comparison decides the rest.
    Compare,

    /// The resource exists and should be removed.
    Delete,
}

impl Transition {
    /// Decide the transition from the caller's intent and remote existence.
    pub fn decide(intent: Intent, exists: bool) -> Self {
        match (intent, exists) {
            (Intent::Present, false) => Self::Create,
            (Intent::Present, true) => Self::Compare,
            (Intent::Absent, true) => Self::Delete,
            (Intent::Absent, false) => Self::Noop,
        }
    }
}

/// The mutation a reconciliation pass performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    None,
    Created,
    Updated,
    Deleted,
}

impl Action {
    /// Returns true if this action mutated the remote system.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Result of reconciling one resource instance.
///
/// Constructed only through the named constructors so that `changed`
/// always agrees with `action`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome<R> {
    pub action: Action,
    pub changed: bool,
    pub record: Option<R>,
}

impl<R> ReconcileOutcome<R> {
    fn new(action: Action, record: Option<R>) -> Self {
        Self {
            action,
            changed: action.is_mutation(),
            record,
        }
    }

    /// No call was made; `record` is the current snapshot, if any.
    pub fn unchanged(record: Option<R>) -> Self {
        Self::new(Action::None, record)
    }

    pub fn created(record: R) -> Self {
        Self::new(Action::Created, Some(record))
    }

    pub fn updated(record: R) -> Self {
        Self::new(Action::Updated, Some(record))
    }

    pub fn deleted() -> Self {
        Self::new(Action::Deleted, None)
    }

    /// Transform the carried record, keeping action and `changed`.
    pub fn map<S, F>(self, f: F) -> ReconcileOutcome<S>
    where
        F: FnOnce(R) -> S,
    {
        ReconcileOutcome {
            action: self.action,
            changed: self.changed,
            record: self.record.map(f),
        }
    }
}

/// Narrow a lookup result to at most one record.
///
/// Zero matches means the resource is absent. More than one is an
/// ambiguity the caller must resolve; the first match is never chosen.
pub fn select_unique<T>(kind: &str, name: &str, mut matches: Vec<T>) -> Result<Option<T>, ReconcileError> {
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        count => Err(ReconcileError::AmbiguousMatch {
            kind: kind.to_string(),
            name: name.to_string(),
            count,
        }),
    }
}

/// Like [`select_unique`], but zero matches is a missing reference.
pub fn resolve_unique<T>(kind: &str, name: &str, matches: Vec<T>) -> Result<T, ReconcileError> {
    select_unique(kind, name, matches)?.ok_or_else(|| ReconcileError::ReferenceNotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    })
}
