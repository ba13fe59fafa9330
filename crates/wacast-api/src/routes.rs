//! API routes

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{campaigns, health, messages, retailcrm, settings};
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/ready", get(health::readiness));

    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route("/active", get(campaigns::active_campaigns))
        .route("/cancel-all", post(campaigns::cancel_all_campaigns))
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/cancel", post(campaigns::cancel_campaign));

    let message_routes = Router::new().route("/test", post(messages::send_test));

    let settings_routes = Router::new()
        .route(
            "/whatsgate",
            get(settings::get_gateway_settings)
                .put(settings::save_gateway_settings)
                .delete(settings::reset_gateway_settings),
        )
        .route(
            "/retailcrm",
            get(settings::get_crm_settings)
                .put(settings::save_crm_settings)
                .delete(settings::reset_crm_settings),
        );

    let crm_routes = Router::new()
        .route("/categories", get(retailcrm::list_categories))
        .route("/filter", post(retailcrm::filter_phones));

    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .nest("/health", health_routes)
        .nest("/campaigns", campaign_routes)
        .nest("/messages", message_routes)
        .nest("/settings", settings_routes)
        .nest("/retailcrm", crm_routes)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
