//! Warden authn/authz primitives used by the gatekeeper service.
//!
//! # Purpose
//! Owns session tokens (issue, validate, refresh, revoke), the shared
//! revocation store, RESTful path matching, the role inheritance graph and
//! the policy engine built on top of them.
//!
//! # How it fits
//! The gatekeeper constructs one `TokenService` and one `PolicyEngine` at
//! startup and hands them to its authentication and authorization stages.
//! Nothing here is a process-wide singleton.
//!
//! # Key invariants
//! - A token is valid only if its signature verifies, it has not expired and
//!   no revocation entry exists for it. Revocation is checked last.
//! - Revocation entries are keyed by a SHA-256 digest of the token.
//! - A role is allowed an action on a resource iff the role or one of its
//!   transitive ancestors holds a rule whose pattern matches the resource and
//!   whose action is identical.
//!
//! # Examples
//! ```rust
//! use warden_authz::key_match;
//!
//! assert!(key_match("/api/v1/doc/:id", "/api/v1/doc/42"));
//! assert!(!key_match("/api/v1/doc/:id", "/api/v1/doc/42/history"));
//! ```
//!
//! # Common pitfalls
//! - Token secrets shorter than 32 bytes are rejected at construction.
//! - Wildcards never span more than one path segment.

mod errors;
mod matcher;
pub mod policy;
pub mod revocation;
mod role_graph;
mod token;

pub use errors::{PolicyError, PolicyResult, RevocationStoreError, TokenError, TokenResult};
pub use matcher::{PathPattern, Segment, key_match};
pub use policy::{
    MemoryPolicyStore, PolicyEngine, PolicyRule, PolicySet, PolicySnapshot, PolicyStore,
};
pub use revocation::{
    MemoryRevocationStore, RedisRevocationStore, RevocationStore, revocation_key,
};
pub use role_graph::{InheritanceEdge, RoleGraph};
pub use token::{
    Claims, DEFAULT_REVOCATION_TIMEOUT, MIN_SECRET_LEN, RevocationFailurePolicy, SignedToken,
    TokenConfig, TokenKind, TokenPair, TokenService,
};
