//! Operator error types

use thiserror::Error;

/// Errors surfaced by a reconcile pass. All are fatal for the current
/// attempt; the controller framework requeues and the whole pass is
/// recomputed from a fresh fetch.
#[derive(Debug, Error)]
pub enum Error {
    /// The canonical config (or another required object) is absent.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The canonical config changed since it was read. The merge is not
    /// associative with a stale base, so the caller must rerun the whole
    /// reconcile rather than patch.
    #[error("conflict updating {kind} {name}, reconcile must be retried from a fresh fetch")]
    Conflict { kind: &'static str, name: String },

    /// A fetched object does not have the shape the engine needs.
    #[error("object {name} is malformed: {reason}")]
    MalformedObject { name: String, reason: &'static str },

    /// Static policy document failed to parse (rule or profile document).
    #[error(transparent)]
    Core(#[from] opfleet_core::CoreError),

    /// Any other cluster I/O failure.
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    /// Failure attaching or removing the tenant finalizer.
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    /// Object serialization failure at the store boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
