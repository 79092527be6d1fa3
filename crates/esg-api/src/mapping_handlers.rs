//! Field mapping, table registry and health handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::error;

use esg_core::types::FieldMappingRequest;
use esg_fieldmap::FieldMapError;

use crate::ApiState;
use crate::handlers::{ApiResponse, body_rejection, error_response};

#[derive(Debug, Default, Deserialize)]
pub struct MappingQuery {
    #[serde(default)]
    pub refresh: bool,
}

fn mapping_error(e: FieldMapError) -> Response {
    match e {
        FieldMapError::Validation(msg) => error_response(&msg, StatusCode::BAD_REQUEST),
        FieldMapError::Upstream(e) => {
            error!(error = %e, "field mapping lookup failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/tables/:tableId/field-mapping
pub async fn get_field_mapping(
    State(state): State<ApiState>,
    Path(table_id): Path<String>,
    Query(query): Query<MappingQuery>,
) -> Response {
    let result = if query.refresh {
        state.resolver.refresh_field_mapping(&table_id).await
    } else {
        state.resolver.get_field_mapping(&table_id).await
    };
    match result {
        Ok(Some(mapping)) => Json(mapping).into_response(),
        Ok(None) => error_response(
            &format!("no field mapping for table '{table_id}'"),
            StatusCode::NOT_FOUND,
        ),
        Err(e) => mapping_error(e),
    }
}

/// POST /api/tables/:tableId/field-mapping
pub async fn put_field_mapping(
    State(state): State<ApiState>,
    Path(table_id): Path<String>,
    request: Result<Json<FieldMappingRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => return body_rejection(rejection),
    };
    match state
        .resolver
        .create_or_update_field_mapping(&table_id, request)
        .await
    {
        Ok(mapping) => Json(mapping).into_response(),
        Err(e) => mapping_error(e),
    }
}

/// GET /api/tables
pub async fn list_tables(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.resolver.registered_tables()).into_response()
}

/// GET /api/health
pub async fn health() -> Response {
    ApiResponse::ok("ok").into_response()
}
