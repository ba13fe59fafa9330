//! Attachment handling for outgoing messages

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};
use wacast_common::types::MessageType;

/// An attachment ready to embed in a gateway request
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub filename: String,
    pub mime_type: String,
    pub message_type: MessageType,
    /// Base64 of the raw bytes
    pub data: String,
}

impl MediaPayload {
    pub fn from_bytes(filename: &str, mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            message_type: MessageType::from_mime(mime_type),
            data: STANDARD.encode(bytes),
        }
    }
}

/// A file received from an operator upload
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedMedia {
    /// Build an upload, falling back to the filename extension when the
    /// client sent no usable content type.
    pub fn new(filename: impl Into<String>, content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let mime_type = match content_type.map(str::trim) {
            Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
            _ => mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        };

        Self {
            filename,
            mime_type,
            bytes,
        }
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_mime(&self.mime_type)
    }

    /// Hex MD5 of the content
    pub fn checksum_md5(&self) -> String {
        hex::encode(Md5::digest(&self.bytes))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn to_payload(&self) -> MediaPayload {
        MediaPayload::from_bytes(&self.filename, &self.mime_type, &self.bytes)
    }
}
