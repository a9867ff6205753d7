//! Domain error types for batch report operations.

use thiserror::Error;

/// Reasons an endpoint designator can be refused by the allowlist validator.
///
/// The variants are distinct on purpose: callers surface limit violations,
/// missing configuration, and security blocks differently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllowlistError {
    /// A relative designator was given but no base URL is configured.
    #[error("relative endpoint given but no upstream base URL is configured")]
    MissingBaseUrl,

    /// The designator (or the configured base) could not be parsed as a URL.
    #[error("invalid endpoint url: {message}")]
    InvalidUrl { message: String },

    /// An absolute designator was given but no allowlist is configured.
    /// Absolute destinations fail closed.
    #[error("absolute endpoint '{host}' denied: no remote allowlist configured")]
    NoAllowlistConfigured { host: String },

    /// The destination host matches no allowlist entry.
    #[error("endpoint host '{host}' is not in the remote allowlist")]
    NotAllowlisted { host: String },

    /// The destination resolves to a loopback, link-local, or private
    /// address. This block cannot be overridden by allowlist membership.
    #[error("endpoint host '{host}' resolves to a private or loopback address")]
    PrivateAddressBlocked { host: String },
}
