//! Preference handlers.
//!
//! Each handler parses its path and query into store types and maps
//! `PrefError` onto HTTP status codes.

use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use esg_prefs::error::PrefError;
use esg_prefs::types::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Malformed or ill-typed request bodies are validation failures.
pub(crate) fn body_rejection(rejection: JsonRejection) -> Response {
    error_response(&rejection.body_text(), StatusCode::BAD_REQUEST)
}

fn pref_error(e: PrefError) -> Response {
    let status = match &e {
        PrefError::Validation(_) => StatusCode::BAD_REQUEST,
        PrefError::Conflict(_) => StatusCode::CONFLICT,
        PrefError::Corrupt { .. } | PrefError::Upstream(_) => {
            error!(error = %e, "preference store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status)
}

// ── Request shapes ─────────────────────────────────────────────

/// Query of the list and bulk-delete endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQuery {
    pub namespace: Option<String>,
    pub table_id: Option<String>,
    pub scope_id: Option<String>,
    pub key: Option<String>,
    pub visibility: Option<String>,
    pub expired: Option<bool>,
}

impl FilterQuery {
    fn into_filter(self) -> Result<PreferenceFilter, PrefError> {
        Ok(PreferenceFilter {
            namespace: self.namespace.as_deref().map(str::parse).transpose()?,
            table_id: self.table_id,
            scope_id: self.scope_id,
            key: self.key,
            visibility: self.visibility.as_deref().map(str::parse).transpose()?,
            expired: self.expired,
        })
    }
}

/// Query of the single-preference endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeQuery {
    pub table_id: Option<String>,
    pub scope_id: Option<String>,
    #[serde(default)]
    pub include_expired: bool,
}

/// Body of `PUT /api/preferences/:userId/:namespace/:key`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPreferenceBody {
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: Option<String>,
    pub table_id: Option<String>,
    pub scope_id: Option<String>,
    pub visibility: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Seconds; ignored when `expiresAt` is present.
    pub ttl: Option<u64>,
    pub overwrite: Option<bool>,
}

fn identity(
    user_id: String,
    namespace: &str,
    key: String,
    table_id: Option<String>,
    scope_id: Option<String>,
) -> Result<PreferenceIdentity, PrefError> {
    Ok(PreferenceIdentity::new(user_id, namespace.parse()?, key)
        .with_table(table_id)
        .with_scope(scope_id))
}

// ── Preferences ────────────────────────────────────────────────

/// GET /api/preferences/:userId
pub async fn list_preferences(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<FilterQuery>,
) -> Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(e) => return pref_error(e),
    };
    match state.prefs.get_all(&user_id, &filter).await {
        Ok(list) => Json(json!({
            "success": true,
            "data": list.records,
            "total": list.total,
        }))
        .into_response(),
        Err(e) => pref_error(e),
    }
}

/// GET /api/preferences/:userId/:namespace/:key
pub async fn get_preference(
    State(state): State<ApiState>,
    Path((user_id, namespace, key)): Path<(String, String, String)>,
    Query(query): Query<ScopeQuery>,
) -> Response {
    let id = match identity(user_id, &namespace, key, query.table_id, query.scope_id) {
        Ok(id) => id,
        Err(e) => return pref_error(e),
    };
    match state.prefs.get(&id, query.include_expired).await {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response("preference not found", StatusCode::NOT_FOUND),
        Err(e) => pref_error(e),
    }
}

/// PUT /api/preferences/:userId/:namespace/:key
pub async fn set_preference(
    State(state): State<ApiState>,
    Path((user_id, namespace, key)): Path<(String, String, String)>,
    body: Result<Json<SetPreferenceBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection(rejection),
    };
    let parsed = (|| {
        let id = identity(user_id, &namespace, key, body.table_id, body.scope_id)?;
        let value_type: PreferenceType = body
            .value_type
            .as_deref()
            .ok_or_else(|| PrefError::Validation("type is required".into()))?
            .parse()?;
        let options = SetOptions {
            visibility: body.visibility.as_deref().map(str::parse).transpose()?,
            expires_at: body.expires_at,
            ttl: body.ttl.map(Duration::from_secs),
            overwrite: body.overwrite,
        };
        Ok::<_, PrefError>((id, value_type, options))
    })();
    let (id, value_type, options) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => return pref_error(e),
    };
    match state.prefs.set(&id, body.value, value_type, &options).await {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => pref_error(e),
    }
}

/// DELETE /api/preferences/:userId/:namespace/:key
pub async fn delete_preference(
    State(state): State<ApiState>,
    Path((user_id, namespace, key)): Path<(String, String, String)>,
    Query(query): Query<ScopeQuery>,
) -> Response {
    let id = match identity(user_id, &namespace, key, query.table_id, query.scope_id) {
        Ok(id) => id,
        Err(e) => return pref_error(e),
    };
    match state.prefs.delete(&id).await {
        Ok(true) => Json(json!({ "success": true })).into_response(),
        Ok(false) => error_response("preference not found", StatusCode::NOT_FOUND),
        Err(e) => pref_error(e),
    }
}

/// DELETE /api/preferences/:userId
pub async fn delete_preferences(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<FilterQuery>,
) -> Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(e) => return pref_error(e),
    };
    match state.prefs.delete_all(&user_id, &filter).await {
        Ok(deleted) => Json(json!({ "success": true, "deleted": deleted })).into_response(),
        Err(e) => pref_error(e),
    }
}
