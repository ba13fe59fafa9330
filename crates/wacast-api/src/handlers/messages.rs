//! Test message handler

use axum::{
    extract::{Multipart, State},
    Json,
};
use std::sync::Arc;
use wacast_core::{send_test_message, TestMessageResult, UploadedMedia};

use super::form::FormData;
use crate::error::{error_response, ApiError};
use crate::state::AppState;

/// Send one message right away, outside any campaign
///
/// POST /messages/test
pub async fn send_test(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<TestMessageResult>, ApiError> {
    let mut form = FormData::read(multipart).await?;

    let media = form
        .take_file("media")
        .map(|m| UploadedMedia::new(m.filename, m.content_type.as_deref(), m.bytes));
    let phone_number = form.required_text("phone_number")?;
    let message = form.required_text("message")?;

    let result = send_test_message(&state.settings, &state.gateway, phone_number, message, media)
        .await
        .map_err(error_response)?;

    Ok(Json(result))
}
