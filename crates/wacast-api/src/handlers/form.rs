//! Multipart form reading

use axum::extract::multipart::{Multipart, MultipartError};
use axum::{http::StatusCode, Json};
use std::collections::HashMap;
use wacast_common::Error;

use crate::error::{error_response, ApiError, ErrorResponse};

/// A file part of a form
#[derive(Debug, Clone)]
pub struct FormFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Text fields and files of a multipart request
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, FormFile>,
}

impl FormData {
    /// Drain the whole request. Empty file parts, as browsers send for an
    /// untouched file input, are dropped.
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = FormData::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(multipart_error)?;
                    if bytes.is_empty() {
                        continue;
                    }
                    form.files.insert(
                        name,
                        FormFile {
                            filename,
                            content_type,
                            bytes: bytes.to_vec(),
                        },
                    );
                }
                None => {
                    let text = field.text().await.map_err(multipart_error)?;
                    form.fields.insert(name, text);
                }
            }
        }

        Ok(form)
    }

    /// A text field, `None` when absent or blank
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn required_text(&self, name: &str) -> Result<&str, ApiError> {
        self.text(name)
            .ok_or_else(|| error_response(Error::invalid_field(name, format!("{} is required", name))))
    }

    /// Parse an integer field, `default` when absent
    pub fn integer(&self, name: &str, default: i32) -> Result<i32, ApiError> {
        match self.text(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                error_response(Error::invalid_field(name, format!("{} must be an integer", name)))
            }),
        }
    }

    pub fn take_file(&mut self, name: &str) -> Option<FormFile> {
        self.files.remove(name)
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ErrorResponse {
                error: "validation".to_string(),
                code: "payload_too_large".to_string(),
                message: e.body_text(),
                field: None,
            }),
        );
    }
    error_response(Error::validation("invalid_multipart", e.body_text()))
}
