//! Policy administration endpoints.
//!
//! # Purpose
//! Thin HTTP surface over `PolicyEngine`: per-role rule sets, single rule
//! grants, inheritance edges and role registration. Access to these routes is
//! itself governed by the authorization stage.
use crate::api::error::{ApiResult, ok};
use crate::api::json_body;
use crate::api::types::{
    AddParentRequest, ChangeResponse, CreateRoleRequest, ReplacePoliciesRequest,
    RolePoliciesResponse, RoleSummary,
};
use crate::app::AppState;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use warden_authz::{PolicyError, PolicyRule};

fn role_policies(state: &AppState, role: String) -> RolePoliciesResponse {
    let rules = state.policies.get_policies_for_role(&role);
    RolePoliciesResponse { role, rules }
}

/// `GET /api/v1/roles/:role/policies`
///
/// # What it does
/// Lists the rules granted directly to `role`. Inherited rules are not
/// expanded.
///
/// # Errors
/// - Envelope `404` if the role is unknown.
pub async fn get_role_policies(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> ApiResult<RolePoliciesResponse> {
    if !state.policies.snapshot().is_known_role(&role) {
        return Err(PolicyError::RoleNotFound(role).into());
    }
    ok(role_policies(&state, role))
}

/// `PUT /api/v1/roles/:role/policies`
///
/// # What it does
/// Swaps the whole rule set of `role` in one step and returns the new set.
/// The role is registered if it did not exist.
///
/// # Errors
/// - Envelope `400` for a malformed body or an invalid rule.
/// - Envelope `500` if the store write fails. The live snapshot is unchanged.
pub async fn replace_role_policies(
    State(state): State<AppState>,
    Path(role): Path<String>,
    payload: Result<Json<ReplacePoliciesRequest>, JsonRejection>,
) -> ApiResult<RolePoliciesResponse> {
    let body = json_body(payload)?;
    let rules = body
        .rules
        .into_iter()
        .map(|spec| PolicyRule::new(role.as_str(), spec.resource, spec.action))
        .collect();
    state.policies.replace_policies_for_role(&role, rules).await?;
    ok(role_policies(&state, role))
}

/// `POST /api/v1/policies`
///
/// # What it does
/// Grants one rule. `changed` is false when the rule was already present.
///
/// # Errors
/// - Envelope `400` for a malformed body or an invalid rule.
pub async fn add_policy(
    State(state): State<AppState>,
    payload: Result<Json<PolicyRule>, JsonRejection>,
) -> ApiResult<ChangeResponse> {
    let rule = json_body(payload)?;
    let changed = state.policies.add_policy(rule).await?;
    ok(ChangeResponse { changed })
}

/// `DELETE /api/v1/policies`. `changed` is false when nothing matched.
pub async fn remove_policy(
    State(state): State<AppState>,
    payload: Result<Json<PolicyRule>, JsonRejection>,
) -> ApiResult<ChangeResponse> {
    let rule = json_body(payload)?;
    let changed = state.policies.remove_policy(&rule).await?;
    ok(ChangeResponse { changed })
}

/// `POST /api/v1/roles/:role/parents`
///
/// # Errors
/// - Envelope `400` if the edge would close an inheritance cycle.
pub async fn add_parent(
    State(state): State<AppState>,
    Path(role): Path<String>,
    payload: Result<Json<AddParentRequest>, JsonRejection>,
) -> ApiResult<ChangeResponse> {
    let body = json_body(payload)?;
    let changed = state
        .policies
        .add_role_inheritance(&role, &body.parent)
        .await?;
    ok(ChangeResponse { changed })
}

pub async fn remove_parent(
    State(state): State<AppState>,
    Path((role, parent)): Path<(String, String)>,
) -> ApiResult<ChangeResponse> {
    let changed = state
        .policies
        .remove_role_inheritance(&role, &parent)
        .await?;
    ok(ChangeResponse { changed })
}

pub async fn list_roles(State(state): State<AppState>) -> ApiResult<Vec<RoleSummary>> {
    let snapshot = state.policies.snapshot();
    let summaries = snapshot
        .roles()
        .into_iter()
        .map(|role| RoleSummary {
            parents: snapshot.parents(&role),
            rules: snapshot.rules_for_role(&role).len(),
            role,
        })
        .collect();
    ok(summaries)
}

/// `POST /api/v1/roles` registers a role with no rules.
pub async fn create_role(
    State(state): State<AppState>,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> ApiResult<ChangeResponse> {
    let body = json_body(payload)?;
    let changed = state.policies.add_role(body.role.trim()).await?;
    ok(ChangeResponse { changed })
}

/// `DELETE /api/v1/roles/:role`
///
/// # What it does
/// Drops the role, its rules and every inheritance edge that mentions it.
///
/// # Errors
/// - Envelope `404` if the role is unknown.
pub async fn delete_role(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> ApiResult<ChangeResponse> {
    state.policies.remove_role(&role).await?;
    ok(ChangeResponse { changed: true })
}
