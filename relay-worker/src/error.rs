//! Error types for the relay pipeline.
//!
//! Configuration errors are fatal at startup, parse and mapping errors are
//! scoped to a single record, and batch errors summarise a whole invocation.

use std::fmt;

use crate::notification::Verdict;

/// Errors raised while building the routing configuration.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("invalid routing configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("no translation found")]
    EmptyRuleSet,
}

/// Per-recipient mapping failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("no match found for `{0}`")]
    NoMatch(String),
}

/// Errors raised while validating an inbound notification.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("missing `content` in SES event")]
    MissingContent,

    #[error("invalid `content` encoding: {0}")]
    ContentDecode(#[from] base64::DecodeError),

    #[error("missing `recipients` in SES event")]
    MissingRecipients,

    #[error("don't forward spam/virus (spam = {spam}, virus = {virus})")]
    UnsafeMessage { spam: Verdict, virus: Verdict },
}

/// Failure of a single record inside a batch.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("no destination")]
    NoDestination,

    #[error("transmission failed: {0:#}")]
    Transmission(anyhow::Error),
}

/// A record failure tagged with the record's identifier.
#[derive(Debug)]
pub struct RecordFailure {
    pub id: String,
    pub error: RecordError,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.error)
    }
}

/// Outcome of a batch that did not fully succeed.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("no record")]
    EmptyBatch,

    #[error("malformed event: {0}")]
    MalformedEvent(serde_json::Error),

    #[error("{}", join_failures(.0))]
    RecordsFailed(Vec<RecordFailure>),
}

fn join_failures(failures: &[RecordFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
