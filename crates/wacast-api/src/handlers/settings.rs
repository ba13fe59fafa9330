//! Gateway and CRM settings handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use wacast_common::Error;
use wacast_storage::{CrmSettings, GatewaySettings, SaveCrmSettings, SaveGatewaySettings};

use crate::error::{error_response, ApiError};
use crate::state::AppState;

/// Reset response
#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    /// Settings rows removed
    pub deleted: u64,
}

/// GET /settings/whatsgate
pub async fn get_gateway_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GatewaySettings>, ApiError> {
    let settings = state
        .settings
        .gateway_settings()
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(Error::NotFound("WhatsApp gateway settings".to_string())))?;
    Ok(Json(settings))
}

/// PUT /settings/whatsgate
pub async fn save_gateway_settings(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SaveGatewaySettings>,
) -> Result<Json<GatewaySettings>, ApiError> {
    let settings = state
        .settings
        .save_gateway_settings(input)
        .await
        .map_err(error_response)?;
    Ok(Json(settings))
}

/// DELETE /settings/whatsgate
pub async fn reset_gateway_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetResponse>, ApiError> {
    let deleted = state
        .settings
        .reset_gateway_settings()
        .await
        .map_err(error_response)?;
    Ok(Json(ResetResponse { deleted }))
}

/// GET /settings/retailcrm
pub async fn get_crm_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CrmSettings>, ApiError> {
    let settings = state
        .settings
        .crm_settings()
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(Error::NotFound("RetailCRM settings".to_string())))?;
    Ok(Json(settings))
}

/// PUT /settings/retailcrm
pub async fn save_crm_settings(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SaveCrmSettings>,
) -> Result<Json<CrmSettings>, ApiError> {
    let settings = state
        .settings
        .save_crm_settings(input)
        .await
        .map_err(error_response)?;
    Ok(Json(settings))
}

/// DELETE /settings/retailcrm
pub async fn reset_crm_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetResponse>, ApiError> {
    let deleted = state
        .settings
        .reset_crm_settings()
        .await
        .map_err(error_response)?;
    Ok(Json(ResetResponse { deleted }))
}
