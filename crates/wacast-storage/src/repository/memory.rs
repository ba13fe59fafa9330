//! In-memory repositories
//!
//! Same contracts as the database repositories, kept behind a single lock so
//! every operation is atomic. Used by the `memory` backend and in tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use wacast_common::types::{CampaignStatus, MediaId, RecipientId, RecipientStatus};
use wacast_common::{Error, Result};

use crate::models::{
    Campaign, CampaignDetails, CampaignListQuery, CampaignMedia, CampaignRecipient, CrmSettings,
    GatewaySettings, NewCampaign, RecipientCounts, RecipientOutcome, SaveCrmSettings,
    SaveGatewaySettings,
};
use crate::repository::campaigns::CampaignRepository;
use crate::repository::settings::SettingsRepository;

#[derive(Default)]
struct CampaignState {
    campaigns: HashMap<String, Campaign>,
    recipients: HashMap<String, Vec<CampaignRecipient>>,
    media: HashMap<MediaId, CampaignMedia>,
}

impl CampaignState {
    fn campaign_mut(&mut self, id: &str) -> Result<&mut Campaign> {
        self.campaigns
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("campaign {}", id)))
    }

    fn transition(&mut self, id: &str, status: CampaignStatus) -> Result<Campaign> {
        let campaign = self.campaign_mut(id)?;
        campaign.check_transition(status)?;

        let now = Utc::now();
        campaign.status = status.to_string();
        if status == CampaignStatus::Started {
            campaign.started_at = Some(now);
        }
        if status.is_terminal() {
            campaign.finished_at = Some(now);
        }
        campaign.updated_at = now;

        Ok(campaign.clone())
    }

    fn bump(&mut self, id: &str, processed: i32, errors: i32) -> Result<()> {
        let campaign = self.campaign_mut(id)?;
        campaign.processed_count += processed;
        campaign.error_count += errors;
        campaign.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory campaign repository
#[derive(Default)]
pub struct InMemoryCampaignRepository {
    state: RwLock<CampaignState>,
}

impl InMemoryCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn create(&self, input: NewCampaign) -> Result<CampaignDetails> {
        input.validate()?;

        let mut state = self.state.write().await;
        if state.campaigns.contains_key(&input.id) {
            return Err(Error::conflict(
                "duplicate_id",
                format!("campaign {} already exists", input.id),
            ));
        }

        let now = Utc::now();
        let media = input.media.map(|m| CampaignMedia {
            id: Uuid::new_v4(),
            filename: m.filename,
            mime_type: m.mime_type,
            message_type: m.message_type.to_string(),
            size: m.size,
            checksum_md5: m.checksum_md5,
            storage_path: m.storage_path,
            created_at: now,
        });

        let campaign = Campaign {
            id: input.id.clone(),
            name: input.name,
            message: input.message,
            status: CampaignStatus::Pending.to_string(),
            total_count: input.phone_numbers.len() as i32,
            processed_count: 0,
            error_count: 0,
            messages_per_hour: input.messages_per_hour,
            initiator: input.initiator,
            media_id: media.as_ref().map(|m| m.id),
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        };

        let recipients: Vec<CampaignRecipient> = input
            .phone_numbers
            .into_iter()
            .enumerate()
            .map(|(position, phone_number)| CampaignRecipient {
                id: Uuid::new_v4(),
                campaign_id: input.id.clone(),
                position: position as i32,
                phone_number,
                status: RecipientStatus::Pending.to_string(),
                error: None,
                gateway_message_id: None,
                sent_at: None,
                created_at: now,
            })
            .collect();

        if let Some(media) = &media {
            state.media.insert(media.id, media.clone());
        }
        state.campaigns.insert(input.id.clone(), campaign.clone());
        state.recipients.insert(input.id, recipients.clone());

        Ok(CampaignDetails {
            campaign,
            media,
            recipients,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Campaign>> {
        Ok(self.state.read().await.campaigns.get(id).cloned())
    }

    async fn get_details(&self, id: &str) -> Result<Option<CampaignDetails>> {
        let state = self.state.read().await;
        let campaign = match state.campaigns.get(id) {
            Some(c) => c.clone(),
            None => return Ok(None),
        };
        let media = campaign.media_id.and_then(|m| state.media.get(&m).cloned());
        let recipients = state.recipients.get(id).cloned().unwrap_or_default();

        Ok(Some(CampaignDetails {
            campaign,
            media,
            recipients,
        }))
    }

    async fn list(&self, query: &CampaignListQuery) -> Result<(Vec<Campaign>, i64)> {
        query.validate()?;

        let state = self.state.read().await;
        let mut matching: Vec<&Campaign> = state
            .campaigns
            .values()
            .filter(|c| query.status.map_or(true, |s| c.status == s.as_str()))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();

        Ok((page, total))
    }

    async fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.status == status.as_str())
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(campaigns)
    }

    async fn update_status(&self, id: &str, status: CampaignStatus) -> Result<Campaign> {
        self.state.write().await.transition(id, status)
    }

    async fn update_recipient(
        &self,
        campaign_id: &str,
        recipient_id: RecipientId,
        outcome: &RecipientOutcome,
    ) -> Result<bool> {
        outcome.validate()?;

        let mut state = self.state.write().await;
        if !state.campaigns.contains_key(campaign_id) {
            return Err(Error::NotFound(format!("campaign {}", campaign_id)));
        }

        let updated = match state
            .recipients
            .get_mut(campaign_id)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == recipient_id))
        {
            Some(row) if row.is_pending() => {
                row.status = outcome.status.to_string();
                row.error = outcome.error.clone();
                row.gateway_message_id = outcome.gateway_message_id.clone();
                row.sent_at = outcome.sent_at;
                true
            }
            _ => false,
        };

        if updated {
            let (processed, errors) = outcome.counter_deltas();
            state.bump(campaign_id, processed, errors)?;
        }
        Ok(updated)
    }

    async fn pending_recipients(&self, campaign_id: &str) -> Result<Vec<CampaignRecipient>> {
        let state = self.state.read().await;
        let mut pending: Vec<CampaignRecipient> = state
            .recipients
            .get(campaign_id)
            .map(|rows| rows.iter().filter(|r| r.is_pending()).cloned().collect())
            .unwrap_or_default();
        pending.sort_by_key(|r| r.position);
        Ok(pending)
    }

    async fn cancel_campaign(&self, id: &str) -> Result<(Campaign, u64)> {
        let mut state = self.state.write().await;
        state.campaign_mut(id)?.check_transition(CampaignStatus::Cancelled)?;

        let mut cancelled = 0u64;
        if let Some(rows) = state.recipients.get_mut(id) {
            for row in rows.iter_mut().filter(|r| r.is_pending()) {
                row.status = RecipientStatus::Cancelled.to_string();
                cancelled += 1;
            }
        }

        state.bump(id, cancelled as i32, 0)?;
        let campaign = state.transition(id, CampaignStatus::Cancelled)?;
        Ok((campaign, cancelled))
    }

    async fn recipient_counts(&self, campaign_id: &str) -> Result<RecipientCounts> {
        let state = self.state.read().await;
        Ok(state
            .recipients
            .get(campaign_id)
            .map(|rows| RecipientCounts::from_recipients(rows))
            .unwrap_or_default())
    }

    async fn get_media(&self, id: MediaId) -> Result<Option<CampaignMedia>> {
        Ok(self.state.read().await.media.get(&id).cloned())
    }

    async fn health_check(&self) -> Result<()> {
        let _ = self.state.read().await;
        Ok(())
    }
}

#[derive(Default)]
struct SettingsState {
    gateway: Vec<GatewaySettings>,
    crm: Vec<CrmSettings>,
    next_id: i64,
}

/// In-memory settings repository keeping the full history
#[derive(Default)]
pub struct InMemorySettingsRepository {
    state: RwLock<SettingsState>,
}

impl InMemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn gateway_settings(&self) -> Result<Option<GatewaySettings>> {
        Ok(self.state.read().await.gateway.last().cloned())
    }

    async fn save_gateway_settings(&self, input: SaveGatewaySettings) -> Result<GatewaySettings> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.next_id += 1;
        let row = GatewaySettings {
            id: state.next_id,
            whatsapp_id: input.whatsapp_id,
            api_key: input.api_key,
            base_url: input.base_url,
            created_at: state.gateway.first().map_or(now, |first| first.created_at),
            updated_at: now,
        };
        state.gateway.push(row.clone());
        Ok(row)
    }

    async fn reset_gateway_settings(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let removed = state.gateway.len() as u64;
        state.gateway.clear();
        Ok(removed)
    }

    async fn crm_settings(&self) -> Result<Option<CrmSettings>> {
        Ok(self.state.read().await.crm.last().cloned())
    }

    async fn save_crm_settings(&self, input: SaveCrmSettings) -> Result<CrmSettings> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.next_id += 1;
        let row = CrmSettings {
            id: state.next_id,
            api_key: input.api_key,
            base_url: input.base_url,
            created_at: state.crm.first().map_or(now, |first| first.created_at),
            updated_at: now,
        };
        state.crm.push(row.clone());
        Ok(row)
    }

    async fn reset_crm_settings(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let removed = state.crm.len() as u64;
        state.crm.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMedia;
    use pretty_assertions::assert_eq;
    use wacast_common::types::MessageType;

    fn new_campaign(id: &str, phones: &[&str]) -> NewCampaign {
        NewCampaign {
            id: id.to_string(),
            name: "Promo".to_string(),
            message: "Hi".to_string(),
            messages_per_hour: 0,
            initiator: Some("ops".to_string()),
            media: None,
            phone_numbers: phones.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_create_then_get_preserves_order() {
        let repo = InMemoryCampaignRepository::new();
        let mut input = new_campaign("c1", &["79160000003", "79160000001", "79160000002"]);
        input.media = Some(NewMedia {
            filename: "a.png".to_string(),
            mime_type: "image/png".to_string(),
            message_type: MessageType::Image,
            size: 4,
            checksum_md5: "abcd".to_string(),
            storage_path: "campaigns/c1/a.png".to_string(),
        });

        let created = repo.create(input).await.unwrap();
        let loaded = repo.get_details("c1").await.unwrap().unwrap();
        assert_eq!(created, loaded);

        let phones: Vec<&str> = loaded
            .recipients
            .iter()
            .map(|r| r.phone_number.as_str())
            .collect();
        assert_eq!(phones, vec!["79160000003", "79160000001", "79160000002"]);
        assert_eq!(loaded.campaign.total_count, 3);
        assert_eq!(loaded.campaign.status, "pending");
        assert_eq!(loaded.media.unwrap().message_type_enum(), MessageType::Image);
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let repo = InMemoryCampaignRepository::new();
        repo.create(new_campaign("c1", &["79160000001"])).await.unwrap();
        let err = repo
            .create(new_campaign("c1", &["79160000001"]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_status_guard() {
        let repo = InMemoryCampaignRepository::new();
        repo.create(new_campaign("c1", &["79160000001"])).await.unwrap();

        let err = repo
            .update_status("c1", CampaignStatus::Finished)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");

        let started = repo.update_status("c1", CampaignStatus::Started).await.unwrap();
        assert!(started.started_at.is_some());
        let done = repo.update_status("c1", CampaignStatus::Finished).await.unwrap();
        assert!(done.finished_at.is_some());

        assert!(repo
            .update_status("c1", CampaignStatus::Cancelled)
            .await
            .is_err());
        assert_eq!(
            repo.update_status("missing", CampaignStatus::Started)
                .await
                .unwrap_err()
                .kind(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn test_recipient_terminal_once_and_counters() {
        let repo = InMemoryCampaignRepository::new();
        let details = repo
            .create(new_campaign("c1", &["79160000001", "79160000002", "79160000003"]))
            .await
            .unwrap();
        let ids: Vec<Uuid> = details.recipients.iter().map(|r| r.id).collect();

        assert!(repo
            .update_recipient("c1", ids[0], &RecipientOutcome::sent(Some("m1".into())))
            .await
            .unwrap());
        assert!(!repo
            .update_recipient("c1", ids[0], &RecipientOutcome::failed("late"))
            .await
            .unwrap());
        assert!(repo
            .update_recipient("c1", ids[1], &RecipientOutcome::failed("401"))
            .await
            .unwrap());

        let pending = repo.pending_recipients("c1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[2]);

        let (cancelled, changed) = repo.cancel_campaign("c1").await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(cancelled.status, "cancelled");

        let campaign = repo.get("c1").await.unwrap().unwrap();
        assert_eq!(campaign.processed_count, 3);
        assert_eq!(campaign.error_count, 1);

        let counts = repo.recipient_counts("c1").await.unwrap();
        assert_eq!(
            counts,
            RecipientCounts {
                pending: 0,
                sent: 1,
                failed: 1,
                cancelled: 1
            }
        );
        let details = repo.get_details("c1").await.unwrap().unwrap();
        assert_eq!(details.recipients[0].gateway_message_id.as_deref(), Some("m1"));
        assert_eq!(details.recipients[1].error.as_deref(), Some("401"));
    }

    #[tokio::test]
    async fn test_cancel_campaign_is_one_step() {
        let repo = InMemoryCampaignRepository::new();
        let details = repo
            .create(new_campaign("c1", &["79160000001", "79160000002", "79160000003"]))
            .await
            .unwrap();
        repo.update_status("c1", CampaignStatus::Started).await.unwrap();
        repo.update_recipient("c1", details.recipients[0].id, &RecipientOutcome::sent(None))
            .await
            .unwrap();

        let (campaign, changed) = repo.cancel_campaign("c1").await.unwrap();
        assert_eq!(changed, 2);
        assert_eq!(campaign.status, "cancelled");
        assert_eq!(campaign.processed_count, 3);
        assert_eq!(campaign.error_count, 0);
        assert!(campaign.finished_at.is_some());
        assert_eq!(repo.get("c1").await.unwrap().unwrap(), campaign);

        let err = repo.cancel_campaign("c1").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        assert_eq!(repo.get("c1").await.unwrap().unwrap(), campaign);
    }

    #[tokio::test]
    async fn test_cancel_campaign_rejected_after_finish() {
        let repo = InMemoryCampaignRepository::new();
        repo.create(new_campaign("c1", &["79160000001", "79160000002"]))
            .await
            .unwrap();
        repo.update_status("c1", CampaignStatus::Started).await.unwrap();
        repo.update_status("c1", CampaignStatus::Failed).await.unwrap();

        let err = repo.cancel_campaign("c1").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");

        // A refused cancel leaves the remaining rows pending
        let counts = repo.recipient_counts("c1").await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.cancelled, 0);
        assert_eq!(
            repo.cancel_campaign("missing").await.unwrap_err().kind(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn test_list_paging_and_filter() {
        let repo = InMemoryCampaignRepository::new();
        for i in 0..5 {
            repo.create(new_campaign(&format!("c{}", i), &["79160000001"]))
                .await
                .unwrap();
        }
        repo.update_status("c2", CampaignStatus::Started).await.unwrap();

        let (page, total) = repo
            .list(&CampaignListQuery {
                limit: 2,
                offset: 1,
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);

        let (started, total) = repo
            .list(&CampaignListQuery {
                status: Some(CampaignStatus::Started),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(started[0].id, "c2");

        let bad = CampaignListQuery {
            limit: 0,
            ..Default::default()
        };
        assert!(repo.list(&bad).await.is_err());

        let running = repo.list_by_status(CampaignStatus::Started).await.unwrap();
        assert_eq!(running.len(), 1);
    }

    #[tokio::test]
    async fn test_settings_history() {
        let repo = InMemorySettingsRepository::new();
        assert!(repo.gateway_settings().await.unwrap().is_none());

        let first = repo
            .save_gateway_settings(SaveGatewaySettings {
                whatsapp_id: "wa1".into(),
                api_key: "k1".into(),
                base_url: "https://gw.example/api/v1".into(),
            })
            .await
            .unwrap();
        let second = repo
            .save_gateway_settings(SaveGatewaySettings {
                whatsapp_id: "wa1".into(),
                api_key: "k2".into(),
                base_url: "https://gw.example/api/v1".into(),
            })
            .await
            .unwrap();
        assert!(second.id > first.id);
        assert_eq!(second.created_at, first.created_at);

        let current = repo.gateway_settings().await.unwrap().unwrap();
        assert_eq!(current.api_key, "k2");

        assert_eq!(repo.reset_gateway_settings().await.unwrap(), 2);
        assert!(repo.gateway_settings().await.unwrap().is_none());

        repo.save_crm_settings(SaveCrmSettings {
            api_key: "crm".into(),
            base_url: "https://shop.example".into(),
        })
        .await
        .unwrap();
        assert_eq!(repo.crm_settings().await.unwrap().unwrap().api_key, "crm");
        assert_eq!(repo.reset_crm_settings().await.unwrap(), 1);
    }
}
