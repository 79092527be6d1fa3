//! esg-api — REST API for the ESG console.
//!
//! Provides axum route handlers for user preferences and field mappings.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/preferences/:userId` | List preferences (filterable) |
//! | DELETE | `/api/preferences/:userId` | Bulk delete preferences |
//! | GET | `/api/preferences/:userId/:namespace/:key` | Get one preference |
//! | PUT | `/api/preferences/:userId/:namespace/:key` | Create or update a preference |
//! | DELETE | `/api/preferences/:userId/:namespace/:key` | Delete one preference |
//! | GET | `/api/tables` | Registered logical tables |
//! | GET | `/api/tables/:tableId/field-mapping` | Resolve a table's field mapping |
//! | POST | `/api/tables/:tableId/field-mapping` | Register a field mapping |
//! | GET | `/api/health` | Liveness |

pub mod handlers;
pub mod mapping_handlers;

use axum::Router;
use axum::routing::get;
use esg_fieldmap::IdentityResolver;
use esg_prefs::PreferenceStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub prefs: PreferenceStore,
    pub resolver: IdentityResolver,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/preferences/{user_id}",
            get(handlers::list_preferences).delete(handlers::delete_preferences),
        )
        .route(
            "/preferences/{user_id}/{namespace}/{key}",
            get(handlers::get_preference)
                .put(handlers::set_preference)
                .delete(handlers::delete_preference),
        )
        .route("/tables", get(mapping_handlers::list_tables))
        .route(
            "/tables/{table_id}/field-mapping",
            get(mapping_handlers::get_field_mapping).post(mapping_handlers::put_field_mapping),
        )
        .route("/health", get(mapping_handlers::health))
        .with_state(state);

    Router::new().nest("/api", api_routes)
}
