//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use wacast_common::types::{
    CampaignId, CampaignStatus, MediaId, MessageType, RecipientStatus, CAMPAIGN_ID_MAX_LEN,
};
use wacast_common::{Error, Result};

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub message: String,
    pub status: String,
    pub total_count: i32,
    pub processed_count: i32,
    pub error_count: i32,
    pub messages_per_hour: i32,
    pub initiator: Option<String>,
    pub media_id: Option<MediaId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Validate a state-machine move from the stored status to `next`
    pub fn check_transition(&self, next: CampaignStatus) -> Result<CampaignStatus> {
        let current = self.status_enum().ok_or_else(|| {
            Error::Internal(format!("campaign {} has unknown status {}", self.id, self.status))
        })?;

        if current.can_transition_to(next) {
            Ok(current)
        } else {
            Err(Error::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Recipients successfully sent so far
    pub fn success_count(&self) -> i32 {
        self.processed_count - self.error_count
    }
}

/// Per-recipient delivery row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct CampaignRecipient {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    pub position: i32,
    pub phone_number: String,
    pub status: String,
    pub error: Option<String>,
    pub gateway_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CampaignRecipient {
    /// Get status enum
    pub fn status_enum(&self) -> Option<RecipientStatus> {
        self.status.parse().ok()
    }

    pub fn is_pending(&self) -> bool {
        self.status_enum() == Some(RecipientStatus::Pending)
    }
}

/// Media attached to a campaign
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct CampaignMedia {
    pub id: MediaId,
    pub filename: String,
    pub mime_type: String,
    pub message_type: String,
    pub size: i64,
    pub checksum_md5: String,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

impl CampaignMedia {
    /// Message type used when sending this media
    pub fn message_type_enum(&self) -> MessageType {
        self.message_type
            .parse()
            .unwrap_or_else(|_| MessageType::from_mime(&self.mime_type))
    }
}

/// Input for a new media record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMedia {
    pub filename: String,
    pub mime_type: String,
    pub message_type: MessageType,
    pub size: i64,
    pub checksum_md5: String,
    pub storage_path: String,
}

/// Input for creating a campaign together with its recipients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub id: CampaignId,
    pub name: String,
    pub message: String,
    pub messages_per_hour: i32,
    pub initiator: Option<String>,
    pub media: Option<NewMedia>,
    /// Canonical phone numbers in dispatch order
    pub phone_numbers: Vec<String>,
}

impl NewCampaign {
    pub const NAME_MAX_CHARS: usize = 100;
    pub const MESSAGE_MAX_CHARS: usize = 4096;
    pub const MAX_MESSAGES_PER_HOUR: i32 = 3600;

    /// Checks on the operator supplied fields, independent of the audience
    pub fn validate_fields(name: &str, message: &str, messages_per_hour: i32) -> Result<()> {
        let name_len = name.trim().chars().count();
        if name_len == 0 || name.chars().count() > Self::NAME_MAX_CHARS {
            return Err(Error::invalid_field(
                "name",
                format!("name must be 1-{} characters", Self::NAME_MAX_CHARS),
            ));
        }

        let message_len = message.trim().chars().count();
        if message_len == 0 || message.chars().count() > Self::MESSAGE_MAX_CHARS {
            return Err(Error::invalid_field(
                "message",
                format!("message must be 1-{} characters", Self::MESSAGE_MAX_CHARS),
            ));
        }

        if !(0..=Self::MAX_MESSAGES_PER_HOUR).contains(&messages_per_hour) {
            return Err(Error::invalid_field(
                "messages_per_hour",
                format!(
                    "messages_per_hour must be between 0 and {}",
                    Self::MAX_MESSAGES_PER_HOUR
                ),
            ));
        }

        Ok(())
    }

    /// Full check shared by every repository implementation
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() || self.id.chars().count() > CAMPAIGN_ID_MAX_LEN {
            return Err(Error::invalid_field(
                "id",
                format!("campaign id must be 1-{} characters", CAMPAIGN_ID_MAX_LEN),
            ));
        }

        Self::validate_fields(&self.name, &self.message, self.messages_per_hour)?;

        if self.phone_numbers.is_empty() {
            return Err(Error::validation(
                "no_valid_phone_numbers",
                "a campaign needs at least one recipient",
            ));
        }

        Ok(())
    }
}

/// Fully hydrated campaign aggregate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignDetails {
    pub campaign: Campaign,
    pub media: Option<CampaignMedia>,
    /// Recipient rows in insertion order
    pub recipients: Vec<CampaignRecipient>,
}

impl CampaignDetails {
    /// Per-status counts derived from the recipient rows
    pub fn counts(&self) -> RecipientCounts {
        RecipientCounts::from_recipients(&self.recipients)
    }
}

/// Terminal outcome written to a recipient row
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientOutcome {
    pub status: RecipientStatus,
    pub gateway_message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl RecipientOutcome {
    pub fn sent(gateway_message_id: Option<String>) -> Self {
        Self {
            status: RecipientStatus::Sent,
            gateway_message_id,
            error: None,
            sent_at: Some(Utc::now()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RecipientStatus::Failed,
            gateway_message_id: None,
            error: Some(error.into()),
            sent_at: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: RecipientStatus::Cancelled,
            gateway_message_id: None,
            error: None,
            sent_at: None,
        }
    }

    /// Rejects non-terminal outcomes and a failure without an error text
    pub fn validate(&self) -> Result<()> {
        match self.status {
            RecipientStatus::Pending => Err(Error::invalid_field(
                "status",
                "a recipient can only move to a terminal status",
            )),
            RecipientStatus::Failed if self.error.is_none() => Err(Error::invalid_field(
                "error",
                "a failed recipient must carry an error",
            )),
            _ => Ok(()),
        }
    }

    /// Counter deltas `(processed, errors)` this outcome contributes
    pub fn counter_deltas(&self) -> (i32, i32) {
        match self.status {
            RecipientStatus::Pending => (0, 0),
            RecipientStatus::Failed => (1, 1),
            RecipientStatus::Sent | RecipientStatus::Cancelled => (1, 0),
        }
    }
}

/// Recipient counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCounts {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl RecipientCounts {
    pub fn from_recipients(recipients: &[CampaignRecipient]) -> Self {
        let mut counts = Self::default();
        for recipient in recipients {
            counts.add(recipient.status_enum(), 1);
        }
        counts
    }

    pub(crate) fn add(&mut self, status: Option<RecipientStatus>, n: i64) {
        match status {
            Some(RecipientStatus::Pending) => self.pending += n,
            Some(RecipientStatus::Sent) => self.sent += n,
            Some(RecipientStatus::Failed) => self.failed += n,
            Some(RecipientStatus::Cancelled) => self.cancelled += n,
            None => {}
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.sent + self.failed + self.cancelled
    }

    /// Recipients in a terminal status
    pub fn processed(&self) -> i64 {
        self.sent + self.failed + self.cancelled
    }

    /// Share of terminal recipients, 0-100
    pub fn progress_percent(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        (self.processed() as f64 * 10000.0 / total as f64).round() / 100.0
    }
}

/// Paged campaign listing query
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignListQuery {
    pub limit: i64,
    pub offset: i64,
    pub status: Option<CampaignStatus>,
}

impl CampaignListQuery {
    pub const DEFAULT_LIMIT: i64 = 500;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn validate(&self) -> Result<()> {
        if !(1..=Self::MAX_LIMIT).contains(&self.limit) {
            return Err(Error::invalid_field(
                "limit",
                format!("limit must be between 1 and {}", Self::MAX_LIMIT),
            ));
        }
        if self.offset < 0 {
            return Err(Error::invalid_field("offset", "offset must not be negative"));
        }
        Ok(())
    }
}

impl Default for CampaignListQuery {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
            status: None,
        }
    }
}

/// Stored WhatsApp gateway credentials
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct GatewaySettings {
    pub id: i64,
    pub whatsapp_id: String,
    pub api_key: String,
    pub base_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for saving gateway credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveGatewaySettings {
    pub whatsapp_id: String,
    pub api_key: String,
    pub base_url: String,
}

/// Stored CRM credentials
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct CrmSettings {
    pub id: i64,
    pub api_key: String,
    pub base_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for saving CRM credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveCrmSettings {
    pub api_key: String,
    pub base_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn campaign(status: &str) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: "c1".to_string(),
            name: "Promo".to_string(),
            message: "Hi".to_string(),
            status: status.to_string(),
            total_count: 3,
            processed_count: 2,
            error_count: 1,
            messages_per_hour: 0,
            initiator: None,
            media_id: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_check_transition() {
        assert_eq!(
            campaign("pending").check_transition(CampaignStatus::Started).unwrap(),
            CampaignStatus::Pending
        );
        let err = campaign("finished")
            .check_transition(CampaignStatus::Cancelled)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        assert_eq!(campaign("started").success_count(), 1);
    }

    #[test]
    fn test_outcome_validation_and_deltas() {
        assert!(RecipientOutcome::sent(Some("m1".into())).validate().is_ok());
        assert_eq!(RecipientOutcome::failed("boom").counter_deltas(), (1, 1));
        assert_eq!(RecipientOutcome::cancelled().counter_deltas(), (1, 0));

        let pending = RecipientOutcome {
            status: RecipientStatus::Pending,
            ..RecipientOutcome::cancelled()
        };
        assert!(pending.validate().is_err());
        let silent_failure = RecipientOutcome {
            error: None,
            ..RecipientOutcome::failed("x")
        };
        assert!(silent_failure.validate().is_err());
    }

    #[test]
    fn test_counts_progress() {
        let counts = RecipientCounts {
            pending: 1,
            sent: 1,
            failed: 1,
            cancelled: 0,
        };
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.processed(), 2);
        assert_eq!(counts.progress_percent(), 66.67);
        assert_eq!(RecipientCounts::default().progress_percent(), 100.0);
    }

    #[test]
    fn test_new_campaign_validation() {
        let valid = NewCampaign {
            id: "c1".to_string(),
            name: "Promo".to_string(),
            message: "Hi".to_string(),
            messages_per_hour: 3600,
            initiator: None,
            media: None,
            phone_numbers: vec!["79161234567".to_string()],
        };
        assert!(valid.validate().is_ok());

        let long_name = NewCampaign {
            name: "x".repeat(101),
            ..valid.clone()
        };
        assert_eq!(long_name.validate().unwrap_err().field(), Some("name"));

        let too_fast = NewCampaign {
            messages_per_hour: 3601,
            ..valid.clone()
        };
        assert_eq!(
            too_fast.validate().unwrap_err().field(),
            Some("messages_per_hour")
        );

        let empty = NewCampaign {
            phone_numbers: vec![],
            ..valid
        };
        assert_eq!(empty.validate().unwrap_err().code(), "no_valid_phone_numbers");
    }

    #[test]
    fn test_list_query_bounds() {
        assert!(CampaignListQuery::default().validate().is_ok());
        let too_big = CampaignListQuery {
            limit: 1001,
            ..Default::default()
        };
        assert_eq!(too_big.validate().unwrap_err().field(), Some("limit"));
        let negative = CampaignListQuery {
            offset: -1,
            ..Default::default()
        };
        assert_eq!(negative.validate().unwrap_err().field(), Some("offset"));
    }
}
