//! RetailCRM lookup handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wacast_common::Error;
use wacast_core::crm::{filter_by_category, FilterResult, Product};
use wacast_core::phone;

use crate::error::{error_response, ApiError};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct CategoriesResponse {
    pub categories: Vec<Product>,
    pub total_count: usize,
}

/// Filter request body
#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub phone_numbers: Vec<String>,
    pub selected_category_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilterResponse {
    pub results: Vec<FilterResult>,
    pub total_count: usize,
    pub should_send_count: usize,
    pub selected_category_name: String,
}

/// Active product groups
///
/// GET /retailcrm/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CategoriesResponse>, ApiError> {
    let categories = state
        .crm
        .product_groups(&CancellationToken::new())
        .await
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(CategoriesResponse {
        total_count: categories.len(),
        categories,
    }))
}

/// Check which customers bought from a product group
///
/// POST /retailcrm/filter
pub async fn filter_phones(
    State(state): State<Arc<AppState>>,
    Json(input): Json<FilterRequest>,
) -> Result<Json<FilterResponse>, ApiError> {
    let category = input.selected_category_name.trim().to_string();
    if category.is_empty() {
        return Err(error_response(Error::invalid_field(
            "selected_category_name",
            "selected_category_name is required",
        )));
    }

    let mut phones = Vec::with_capacity(input.phone_numbers.len());
    for raw in &input.phone_numbers {
        let canonical = phone::normalize(raw).map_err(|e| {
            error_response(Error::Validation {
                code: e.code(),
                field: Some("phone_numbers".to_string()),
                message: e.to_string(),
            })
        })?;
        phones.push(canonical);
    }
    if phones.is_empty() {
        return Err(error_response(Error::invalid_field(
            "phone_numbers",
            "at least one phone number is required",
        )));
    }

    let results = filter_by_category(&state.crm, &phones, &category, &CancellationToken::new())
        .await
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(FilterResponse {
        total_count: results.len(),
        should_send_count: results.iter().filter(|r| r.should_send).count(),
        selected_category_name: category,
        results,
    }))
}
