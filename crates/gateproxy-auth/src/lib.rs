//! # gateproxy-auth
//!
//! Bearer credential trust for the gateproxy gateway.
//!
//! This crate provides:
//! - A lock-free snapshot container for values replaced wholesale by a single writer
//! - The key fetcher contract and a GraphQL implementation against the key authority
//! - A self-refreshing signing key directory with fetch-on-miss lookup
//! - RS256 token verification that surfaces subject, audience and purpose
//!
//! ## Modules
//!
//! - [`snapshot`] - Atomically swapped immutable snapshots
//! - [`keys`] - Signing key model and fetchers
//! - [`directory`] - Key directory with background polling
//! - [`verifier`] - Token verification and identity extraction

pub mod directory;
pub mod keys;
pub mod snapshot;
pub mod verifier;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use directory::{DirectoryConfig, KeyDirectory, KeyNotFoundError};
pub use keys::graphql::GraphQlKeyFetcher;
pub use keys::{KeyFetchError, KeyFetcher, SigningKey};
pub use snapshot::SnapshotContainer;
pub use verifier::{ParsedIdentity, TokenVerifier, VerifierConfig, VerifyError};
