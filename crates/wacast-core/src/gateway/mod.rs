//! WhatsApp gateway integration
//!
//! A thin client for the gateway's `POST /send` endpoint plus the media
//! helpers used to build outgoing payloads.

pub mod client;
pub mod media;

pub use client::{
    GatewayClient, GatewayCredentials, GatewayError, OutgoingMessage, SendResponse,
};
pub use media::{MediaPayload, UploadedMedia};
