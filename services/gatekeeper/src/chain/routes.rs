//! Per-route stage exclusions.
use super::StageName;
use crate::config::RouteExclusion;
use anyhow::{Context, Result};
use axum::http::Method;
use std::collections::HashSet;
use warden_authz::PathPattern;

pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/v1/auth/logout";
pub const ME_PATH: &str = "/api/v1/auth/me";
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone)]
struct RouteRule {
    method: Option<Method>,
    pattern: PathPattern,
    skip: HashSet<StageName>,
}

impl RouteRule {
    fn applies(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().is_none_or(|expected| expected == method) && self.pattern.matches(path)
    }
}

/// Maps (method, path pattern) to the stages a matching request skips.
///
/// Every matching rule contributes; unmatched requests run every stage.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session endpoints that must work without a token. Logout and `me`
    /// authenticate but are open to every role.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        let public = [StageName::Authn, StageName::Authz];
        let builtins: [(Method, &str, &[StageName]); 5] = [
            (Method::POST, LOGIN_PATH, &public),
            (Method::POST, REFRESH_PATH, &public),
            (Method::GET, HEALTH_PATH, &public),
            (Method::POST, LOGOUT_PATH, &[StageName::Authz]),
            (Method::GET, ME_PATH, &[StageName::Authz]),
        ];
        for (method, path, skip) in builtins {
            table.push(Some(method), path, skip.iter().copied());
        }
        table
    }

    /// Built-in exclusions followed by the configured ones.
    ///
    /// # Errors
    /// - A method that is not a valid HTTP token.
    /// - A path that does not parse as a pattern.
    pub fn from_config(exclusions: &[RouteExclusion]) -> Result<Self> {
        let mut table = Self::builtin();
        for exclusion in exclusions {
            let method = exclusion
                .method
                .as_deref()
                .map(|raw| Method::from_bytes(raw.to_ascii_uppercase().as_bytes()))
                .transpose()
                .with_context(|| format!("route exclusion method for {}", exclusion.path))?;
            table.exclude(method, &exclusion.path, exclusion.skip.iter().copied())?;
        }
        Ok(table)
    }

    /// Add one exclusion. `None` for `method` matches every method.
    pub fn exclude(
        &mut self,
        method: Option<Method>,
        path: &str,
        skip: impl IntoIterator<Item = StageName>,
    ) -> Result<()> {
        let pattern =
            PathPattern::parse(path).with_context(|| format!("route exclusion path {path}"))?;
        self.rules.push(RouteRule {
            method,
            pattern,
            skip: skip.into_iter().collect(),
        });
        Ok(())
    }

    // Built-in paths are constants known to parse.
    fn push(&mut self, method: Option<Method>, path: &str, skip: impl IntoIterator<Item = StageName>) {
        if let Ok(pattern) = PathPattern::parse(path) {
            self.rules.push(RouteRule {
                method,
                pattern,
                skip: skip.into_iter().collect(),
            });
        }
    }

    /// Union of the stages skipped by every rule matching the request.
    pub fn skipped(&self, method: &Method, path: &str) -> HashSet<StageName> {
        self.rules
            .iter()
            .filter(|rule| rule.applies(method, path))
            .flat_map(|rule| rule.skip.iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
