//! Campaign handlers

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use wacast_common::types::CampaignStatus;
use wacast_common::Error;
use wacast_core::campaign::{
    CampaignPage, CampaignView, CancelledCampaign, CreateCampaignRequest, CreatedCampaign,
    StartedCampaign,
};
use wacast_core::UploadedMedia;
use wacast_storage::CampaignListQuery;

use super::form::FormData;
use crate::error::{error_response, ApiError};
use crate::state::AppState;

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
}

/// Start response
#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    #[serde(flatten)]
    pub started: StartedCampaign,
    /// Sending continues in the background
    #[serde(rename = "async")]
    pub is_async: bool,
}

/// Cancel request body
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

impl CancelRequest {
    /// The body is optional; when present it must be a valid request
    fn from_body(body: &[u8]) -> Result<Self, Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| Error::validation("invalid_body", format!("invalid cancel request: {}", e)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveCampaignsResponse {
    pub campaign_ids: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelAllResponse {
    pub cancelled: Vec<String>,
    pub total: usize,
}

/// Create a campaign from a multipart upload
///
/// POST /campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreatedCampaign>), ApiError> {
    let mut form = FormData::read(multipart).await?;

    let file = form.take_file("file").ok_or_else(|| {
        error_response(Error::invalid_field("file", "a spreadsheet file is required"))
    })?;
    let media = form
        .take_file("media")
        .map(|m| UploadedMedia::new(m.filename, m.content_type.as_deref(), m.bytes));

    let request = CreateCampaignRequest {
        name: form.required_text("name")?.to_string(),
        message: form.required_text("message")?.to_string(),
        messages_per_hour: form.integer("messages_per_hour", 0)?,
        additional_numbers: form.text("additional_numbers").unwrap_or_default().to_string(),
        exclude_numbers: form.text("exclude_numbers").unwrap_or_default().to_string(),
        initiator: form.text("initiator").map(str::to_string),
        selected_category_name: form.text("selected_category_name").map(str::to_string),
        file: file.bytes,
        media,
    };

    let created = state.campaigns.create(request).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Start sending
///
/// POST /campaigns/:campaign_id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
) -> Result<Json<StartResponse>, ApiError> {
    let started = state
        .campaigns
        .start(&campaign_id)
        .await
        .map_err(error_response)?;

    Ok(Json(StartResponse {
        started,
        is_async: true,
    }))
}

/// Cancel a campaign
///
/// POST /campaigns/:campaign_id/cancel
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
    body: Bytes,
) -> Result<Json<CancelledCampaign>, ApiError> {
    let body = CancelRequest::from_body(&body).map_err(error_response)?;

    let cancelled = state
        .campaigns
        .cancel(&campaign_id, body.reason)
        .await
        .map_err(error_response)?;

    Ok(Json(cancelled))
}

/// Get a campaign with its recipients
///
/// GET /campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
) -> Result<Json<CampaignView>, ApiError> {
    let campaign = state
        .campaigns
        .get(&campaign_id)
        .await
        .map_err(error_response)?;
    Ok(Json(campaign))
}

/// List campaigns
///
/// GET /campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<CampaignPage>, ApiError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<CampaignStatus>)
        .transpose()
        .map_err(error_response)?;

    let query = CampaignListQuery {
        limit: query.limit.unwrap_or(CampaignListQuery::DEFAULT_LIMIT),
        offset: query.offset.unwrap_or(0),
        status,
    };

    let page = state.campaigns.list(query).await.map_err(error_response)?;
    Ok(Json(page))
}

/// Campaigns with a running worker
///
/// GET /campaigns/active
pub async fn active_campaigns(State(state): State<Arc<AppState>>) -> Json<ActiveCampaignsResponse> {
    let campaign_ids = state.campaigns.active();
    Json(ActiveCampaignsResponse {
        total: campaign_ids.len(),
        campaign_ids,
    })
}

/// Cancel every running campaign
///
/// POST /campaigns/cancel-all
pub async fn cancel_all_campaigns(State(state): State<Arc<AppState>>) -> Json<CancelAllResponse> {
    let cancelled = state.campaigns.cancel_all();
    Json(CancelAllResponse {
        total: cancelled.len(),
        cancelled,
    })
}
