//! WhatsApp gateway HTTP client

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use wacast_common::config::GatewayConfig;
use wacast_common::types::MessageType;
use wacast_common::Error;

use super::media::MediaPayload;

/// Gateway errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("gateway is not configured: {0}")]
    Configuration(String),

    #[error("gateway rejected the API key")]
    Unauthorized,

    #[error("gateway server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("gateway API error: {0}")]
    Api(String),

    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway network error: {0}")]
    Network(String),

    #[error("failed to decode gateway response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration_error",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Server { .. } => "server_error",
            GatewayError::Api(_) => "api_error",
            GatewayError::Timeout => "timeout",
            GatewayError::Network(_) => "network_error",
            GatewayError::Decode(_) => "decode_error",
        }
    }

    /// Failures worth one in-place retry
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::Network(_))
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

impl From<GatewayError> for Error {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Configuration(msg) => Error::Configuration(msg),
            GatewayError::Unauthorized => Error::Unauthorized(e.to_string()),
            GatewayError::Timeout => Error::Timeout(e.to_string()),
            GatewayError::Network(_) => Error::Network(e.to_string()),
            other => Error::ExternalService(other.to_string()),
        }
    }
}

/// Credentials captured for a single send
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCredentials {
    pub whatsapp_id: String,
    pub api_key: Option<String>,
    pub base_url: String,
}

impl GatewayCredentials {
    fn validate(&self) -> Result<(), GatewayError> {
        if self.whatsapp_id.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "whatsapp_id is not set".to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(GatewayError::Configuration("base_url is not set".to_string()));
        }
        Ok(())
    }

    fn send_url(&self) -> String {
        format!("{}/send", self.base_url.trim().trim_end_matches('/'))
    }
}

/// A message addressed to one recipient
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub phone: String,
    pub body: String,
    /// Pre-encoded attachment, shared between sends of one campaign
    pub media: Option<Arc<MediaPayload>>,
}

impl OutgoingMessage {
    pub fn text(phone: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            body: body.into(),
            media: None,
        }
    }

    pub fn with_media(mut self, media: Arc<MediaPayload>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.media
            .as_ref()
            .map_or(MessageType::Text, |m| m.message_type)
    }
}

/// Body returned by the gateway on success; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SendResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SendResponse {
    /// Read whatever a 2xx body carries. The status code alone decides
    /// success, so an unparseable body yields an empty response.
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice(body) else {
            return Self::default();
        };
        let field = |name: &str| match fields.get(name) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Self {
            id: field("id"),
            status: field("status"),
            message: field("message"),
        }
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    #[serde(rename = "whatsappId")]
    whatsapp_id: &'a str,
    #[serde(rename = "async")]
    async_send: bool,
    recipient: RecipientBody<'a>,
    message: MessageBody<'a>,
}

#[derive(Serialize)]
struct RecipientBody<'a> {
    number: &'a str,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaBody<'a>>,
}

#[derive(Serialize)]
struct MediaBody<'a> {
    mimetype: &'a str,
    data: &'a str,
    filename: &'a str,
}

/// Gateway client
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    async_send: bool,
}

impl GatewayClient {
    /// Create a new client
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            async_send: config.async_send,
        })
    }

    /// Send one message.
    ///
    /// Dropping the returned future aborts the HTTP request.
    pub async fn send(
        &self,
        credentials: &GatewayCredentials,
        message: &OutgoingMessage,
    ) -> Result<SendResponse, GatewayError> {
        credentials.validate()?;

        let request = SendRequest {
            whatsapp_id: &credentials.whatsapp_id,
            async_send: self.async_send,
            recipient: RecipientBody {
                number: &message.phone,
            },
            message: MessageBody {
                kind: message.message_type().as_str(),
                body: &message.body,
                media: message.media.as_deref().map(|m| MediaBody {
                    mimetype: &m.mime_type,
                    data: &m.data,
                    filename: &m.filename,
                }),
            },
        };

        let mut builder = self.http.post(credentials.send_url()).json(&request);
        if let Some(key) = credentials.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.header("X-Api-Key", key);
        }

        debug!(
            recipient = %message.phone,
            message_type = %message.message_type(),
            "Sending gateway message"
        );

        let response = builder.send().await.map_err(GatewayError::from_reqwest)?;
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await.map_err(GatewayError::from_reqwest)?;
            return Ok(SendResponse::from_body(&body));
        }

        let body = response.text().await.unwrap_or_default();
        warn!(recipient = %message.phone, status = %status, "Gateway send rejected");

        Err(match status {
            StatusCode::UNAUTHORIZED => GatewayError::Unauthorized,
            s if s.is_server_error() => GatewayError::Server {
                status: s.as_u16(),
                body,
            },
            s => GatewayError::Api(s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> GatewayClient {
        GatewayClient::new(&GatewayConfig::default()).unwrap()
    }

    fn credentials(server: &MockServer) -> GatewayCredentials {
        GatewayCredentials {
            whatsapp_id: "wa-1".to_string(),
            api_key: Some("secret".to_string()),
            base_url: format!("{}/api/v1/", server.uri()),
        }
    }

    #[tokio::test]
    async fn test_send_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/send"))
            .and(header("X-Api-Key", "secret"))
            .and(body_json(serde_json::json!({
                "whatsappId": "wa-1",
                "async": false,
                "recipient": {"number": "79161234567"},
                "message": {"type": "text", "body": "Hi"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "msg-1", "status": "queued"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = client()
            .send(&credentials(&server), &OutgoingMessage::text("79161234567", "Hi"))
            .await
            .unwrap();
        assert_eq!(response.id.as_deref(), Some("msg-1"));
        assert_eq!(response.status.as_deref(), Some("queued"));
        assert_eq!(response.message, None);
    }

    #[tokio::test]
    async fn test_send_media() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/send"))
            .and(body_json(serde_json::json!({
                "whatsappId": "wa-1",
                "async": false,
                "recipient": {"number": "79161234567"},
                "message": {
                    "type": "image",
                    "body": "Look",
                    "media": {"mimetype": "image/png", "data": "AQID", "filename": "a.png"}
                }
            })))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let media = Arc::new(MediaPayload::from_bytes("a.png", "image/png", &[1, 2, 3]));
        let message = OutgoingMessage::text("79161234567", "Look").with_media(media);
        let response = client().send(&credentials(&server), &message).await.unwrap();
        assert_eq!(response, SendResponse::default());
    }

    #[tokio::test]
    async fn test_success_body_is_optional() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 12345, "status": "ok"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!(["queued"])))
            .mount(&server)
            .await;

        let creds = credentials(&server);
        let msg = OutgoingMessage::text("79161234567", "Hi");
        let gw = client();

        assert_eq!(gw.send(&creds, &msg).await.unwrap(), SendResponse::default());

        let response = gw.send(&creds, &msg).await.unwrap();
        assert_eq!(response.id.as_deref(), Some("12345"));
        assert_eq!(response.status.as_deref(), Some("ok"));

        assert_eq!(gw.send(&creds, &msg).await.unwrap(), SendResponse::default());
    }

    #[test]
    fn test_response_fields_ignore_other_types() {
        let response = SendResponse::from_body(br#"{"id": null, "status": true, "message": "sent"}"#);
        assert_eq!(
            response,
            SendResponse {
                id: None,
                status: None,
                message: Some("sent".to_string()),
            }
        );
        assert_eq!(SendResponse::from_body(b"  "), SendResponse::default());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let creds = credentials(&server);
        let msg = OutgoingMessage::text("79161234567", "Hi");
        let gw = client();

        assert_eq!(gw.send(&creds, &msg).await.unwrap_err(), GatewayError::Unauthorized);
        assert_eq!(
            gw.send(&creds, &msg).await.unwrap_err(),
            GatewayError::Server {
                status: 503,
                body: "maintenance".to_string()
            }
        );
        let err = gw.send(&creds, &msg).await.unwrap_err();
        assert_eq!(err.code(), "api_error");
        assert!(err.to_string().contains("422"));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let gw = GatewayClient::new(&GatewayConfig {
            timeout_secs: 1,
            ..GatewayConfig::default()
        })
        .unwrap();
        let err = gw
            .send(&credentials(&server), &OutgoingMessage::text("79161234567", "Hi"))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Timeout);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let creds = GatewayCredentials {
            whatsapp_id: String::new(),
            api_key: None,
            base_url: "http://127.0.0.1:9".to_string(),
        };
        let err = client()
            .send(&creds, &OutgoingMessage::text("79161234567", "Hi"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "configuration_error");
        assert_eq!(Error::from(err).status_code(), 503);
    }
}
