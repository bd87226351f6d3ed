//! Generation-time validation errors.

use thiserror::Error;

/// A plan input was missing, malformed, or inconsistent with the
/// resolved application definition.
///
/// These are always raised before an artifact exists; none of them can
/// surface while a deployment is running.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error(
        "invalid version '{0}': use 1-128 characters from [A-Za-z0-9._-], starting with a letter or digit"
    )]
    InvalidVersion(String),

    #[error("unknown probe target '{probe}' (services: {available})")]
    UnknownProbeTarget { probe: String, available: String },

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
