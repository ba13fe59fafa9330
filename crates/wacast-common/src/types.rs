//! Common types for Wacast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for campaigns (opaque string, at most 36 chars)
pub type CampaignId = String;

/// Unique identifier for recipient rows
pub type RecipientId = Uuid;

/// Unique identifier for media records
pub type MediaId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Maximum length of a campaign id
pub const CAMPAIGN_ID_MAX_LEN: usize = 36;

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Started,
    Finished,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [CampaignStatus; 5] = [
        CampaignStatus::Pending,
        CampaignStatus::Started,
        CampaignStatus::Finished,
        CampaignStatus::Failed,
        CampaignStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Started => "started",
            CampaignStatus::Finished => "finished",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Finished | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }

    /// Campaign state machine.
    ///
    /// ```text
    /// pending -> started -> finished | cancelled | failed
    /// pending -> cancelled
    /// ```
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Pending, Cancelled)
                | (Started, Finished)
                | (Started, Cancelled)
                | (Started, Failed)
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CampaignStatus::Pending),
            "started" => Ok(CampaignStatus::Started),
            "finished" => Ok(CampaignStatus::Finished),
            "failed" => Ok(CampaignStatus::Failed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(crate::Error::invalid_field(
                "status",
                format!("unknown campaign status: {}", other),
            )),
        }
    }
}

/// Per-recipient delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Failed => "failed",
            RecipientStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecipientStatus::Pending)
    }
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecipientStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecipientStatus::Pending),
            "sent" => Ok(RecipientStatus::Sent),
            "failed" => Ok(RecipientStatus::Failed),
            "cancelled" => Ok(RecipientStatus::Cancelled),
            other => Err(crate::Error::invalid_field(
                "status",
                format!("unknown recipient status: {}", other),
            )),
        }
    }
}

/// Gateway message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Voice,
    Sticker,
    Doc,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Voice => "voice",
            MessageType::Sticker => "sticker",
            MessageType::Doc => "doc",
        }
    }

    /// Infer the message type for an attachment from its mime type.
    ///
    /// `image/*` is sent as an image, `audio/*` as a voice note; everything
    /// else (video, application, unknown) goes out as a document.
    pub fn from_mime(mime: &str) -> Self {
        let top = mime
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match top.as_str() {
            "image" => MessageType::Image,
            "audio" => MessageType::Voice,
            _ => MessageType::Doc,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "voice" => Ok(MessageType::Voice),
            "sticker" => Ok(MessageType::Sticker),
            "doc" => Ok(MessageType::Doc),
            other => Err(crate::Error::invalid_field(
                "message_type",
                format!("unknown message type: {}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_campaign_transitions() {
        use CampaignStatus::*;
        assert!(Pending.can_transition_to(Started));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Started.can_transition_to(Finished));
        assert!(Started.can_transition_to(Failed));
        assert!(Started.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Finished));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Started.can_transition_to(Started));
        for terminal in [Finished, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in CampaignStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in CampaignStatus::ALL {
            assert_eq!(CampaignStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(CampaignStatus::from_str("running").is_err());
        assert_eq!(RecipientStatus::from_str("sent").unwrap(), RecipientStatus::Sent);
    }

    #[test]
    fn test_message_type_from_mime() {
        assert_eq!(MessageType::from_mime("image/png"), MessageType::Image);
        assert_eq!(MessageType::from_mime("audio/ogg"), MessageType::Voice);
        assert_eq!(MessageType::from_mime("video/mp4"), MessageType::Doc);
        assert_eq!(MessageType::from_mime("application/pdf"), MessageType::Doc);
        assert_eq!(MessageType::from_mime(""), MessageType::Doc);
        assert_eq!(MessageType::from_mime("IMAGE/JPEG"), MessageType::Image);
    }
}
