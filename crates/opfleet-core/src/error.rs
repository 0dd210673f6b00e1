//! Error types for the merge engine

use thiserror::Error;

/// Errors raised by the pure merge engine
#[derive(Debug, Error)]
pub enum CoreError {
    /// A static policy document (sizing rules, size profiles) failed to parse.
    /// Always fatal for the reconcile pass; no partial application happens.
    #[error("malformed {context} document: {source}")]
    MalformedDocument {
        context: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
}

impl CoreError {
    pub fn malformed(context: &'static str, source: serde_yaml::Error) -> Self {
        CoreError::MalformedDocument { context, source }
    }
}
