//! Warden gatekeeper service library crate.
//!
//! # Purpose
//! Exposes the gatekeeper chain, HTTP API, configuration, account directory
//! and policy storage for use by the binary and integration tests.
//!
//! # Notes
//! The token service, policy engine and rate limiter live in the `warden-*`
//! library crates; this crate only wires them into an axum service.
pub mod accounts;
pub mod api;
pub mod app;
pub mod chain;
pub mod config;
pub mod observability;
pub mod store;
