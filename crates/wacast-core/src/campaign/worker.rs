//! Campaign worker
//!
//! Drives one campaign from `started` to a terminal status, sending to each
//! pending recipient in insertion order at the campaign's pace.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wacast_common::config::WorkerConfig;
use wacast_common::types::CampaignStatus;
use wacast_common::{Error, Result};
use wacast_storage::{Campaign, CampaignRecipient, CampaignRepository, MediaStorage, RecipientOutcome};

use super::pacing::Pacer;
use super::registry::CampaignRegistry;
use crate::gateway::{GatewayClient, GatewayError, MediaPayload, OutgoingMessage, SendResponse};
use crate::phone;
use crate::settings::SettingsService;

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Finished,
    Cancelled,
    Failed(String),
}

impl WorkerOutcome {
    pub fn status(&self) -> CampaignStatus {
        match self {
            WorkerOutcome::Finished => CampaignStatus::Finished,
            WorkerOutcome::Cancelled => CampaignStatus::Cancelled,
            WorkerOutcome::Failed(_) => CampaignStatus::Failed,
        }
    }
}

/// Collaborators shared by every worker
#[derive(Clone)]
pub struct WorkerContext {
    pub repo: Arc<dyn CampaignRepository>,
    pub settings: Arc<SettingsService>,
    pub gateway: GatewayClient,
    pub media: MediaStorage,
    pub registry: Arc<CampaignRegistry>,
    pub config: WorkerConfig,
}

enum SendAttempt {
    Done(std::result::Result<SendResponse, GatewayError>),
    Cancelled,
}

/// Worker for a single campaign
pub struct CampaignWorker {
    ctx: WorkerContext,
    campaign_id: String,
    cancel: CancellationToken,
}

impl CampaignWorker {
    /// The caller must have registered `cancel` for `campaign_id`
    pub fn new(ctx: WorkerContext, campaign_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            campaign_id: campaign_id.into(),
            cancel,
        }
    }

    /// Run to completion. Never panics on campaign errors: anything that is
    /// not attributable to a single recipient fails the campaign.
    pub async fn run(self) -> WorkerOutcome {
        let outcome = match self.drive().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(campaign_id = %self.campaign_id, error = %e, "Campaign worker aborted");
                if let Err(status_err) = self
                    .ctx
                    .repo
                    .update_status(&self.campaign_id, CampaignStatus::Failed)
                    .await
                {
                    warn!(
                        campaign_id = %self.campaign_id,
                        error = %status_err,
                        "Could not mark campaign as failed"
                    );
                }
                WorkerOutcome::Failed(e.to_string())
            }
        };

        self.ctx.registry.unregister(&self.campaign_id);
        info!(campaign_id = %self.campaign_id, status = %outcome.status(), "Campaign worker exited");
        outcome
    }

    async fn drive(&self) -> Result<WorkerOutcome> {
        let campaign = self
            .ctx
            .repo
            .get(&self.campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("campaign {}", self.campaign_id)))?;

        if campaign.status_enum() != Some(CampaignStatus::Started) {
            self.ctx
                .repo
                .update_status(&self.campaign_id, CampaignStatus::Started)
                .await?;
        }

        let media = self.load_media(&campaign).await?;
        let recipients = self.ctx.repo.pending_recipients(&self.campaign_id).await?;

        info!(
            campaign_id = %self.campaign_id,
            pending = recipients.len(),
            messages_per_hour = campaign.messages_per_hour,
            "Campaign worker started"
        );

        let mut pacer = Pacer::new(campaign.messages_per_hour);
        let mut unauthorized_streak = 0u32;

        for recipient in recipients {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled().await;
            }

            if !phone::is_canonical(&recipient.phone_number) {
                let message = match phone::normalize(&recipient.phone_number) {
                    Err(e) => e.to_string(),
                    Ok(_) => format!("phone number {} is not canonical", recipient.phone_number),
                };
                warn!(campaign_id = %self.campaign_id, recipient = %recipient.phone_number, "Skipping invalid phone number");
                self.record(&recipient, &RecipientOutcome::failed(message)).await?;
                continue;
            }

            if let Some(deadline) = pacer.next_deadline() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return self.finish_cancelled().await,
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            pacer.record_fire(Instant::now());

            let mut message = OutgoingMessage::text(&recipient.phone_number, &campaign.message);
            if let Some(media) = &media {
                message = message.with_media(media.clone());
            }

            match self.deliver(&message).await? {
                SendAttempt::Cancelled => {
                    self.record(&recipient, &RecipientOutcome::cancelled()).await?;
                    return self.finish_cancelled().await;
                }
                SendAttempt::Done(Ok(response)) => {
                    unauthorized_streak = 0;
                    debug!(
                        campaign_id = %self.campaign_id,
                        recipient = %recipient.phone_number,
                        gateway_id = ?response.id,
                        "Message sent"
                    );
                    self.record(&recipient, &RecipientOutcome::sent(response.id)).await?;
                }
                SendAttempt::Done(Err(e)) => {
                    self.record(&recipient, &RecipientOutcome::failed(e.to_string()))
                        .await?;

                    match &e {
                        GatewayError::Configuration(reason) => {
                            return self.finish_failed(reason.clone()).await;
                        }
                        GatewayError::Unauthorized => {
                            unauthorized_streak += 1;
                            self.ctx.settings.invalidate_gateway().await;
                            if unauthorized_streak >= self.ctx.config.unauthorized_threshold {
                                return self
                                    .finish_failed(format!(
                                        "gateway rejected credentials for {} consecutive recipients",
                                        unauthorized_streak
                                    ))
                                    .await;
                            }
                        }
                        _ => unauthorized_streak = 0,
                    }

                    warn!(
                        campaign_id = %self.campaign_id,
                        recipient = %recipient.phone_number,
                        error = %e,
                        code = e.code(),
                        "Message failed"
                    );
                }
            }
        }

        self.ctx
            .repo
            .update_status(&self.campaign_id, CampaignStatus::Finished)
            .await?;
        info!(campaign_id = %self.campaign_id, "Campaign finished");
        Ok(WorkerOutcome::Finished)
    }

    /// Read the campaign's attachment once and encode it for every send
    async fn load_media(&self, campaign: &Campaign) -> Result<Option<Arc<MediaPayload>>> {
        let Some(media_id) = campaign.media_id else {
            return Ok(None);
        };

        let media = self
            .ctx
            .repo
            .get_media(media_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("media {}", media_id)))?;
        let bytes = self.ctx.media.read_media(&media.storage_path).await?;

        Ok(Some(Arc::new(MediaPayload::from_bytes(
            &media.filename,
            &media.mime_type,
            &bytes,
        ))))
    }

    /// Send with one in-place retry for transient failures
    async fn deliver(&self, message: &OutgoingMessage) -> Result<SendAttempt> {
        match self.send_once(message).await? {
            SendAttempt::Done(Err(e)) if e.is_transient() => {
                warn!(
                    campaign_id = %self.campaign_id,
                    recipient = %message.phone,
                    error = %e,
                    "Transient gateway failure, retrying once"
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(SendAttempt::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(self.ctx.config.retry_backoff_ms)) => {}
                }
                self.send_once(message).await
            }
            other => Ok(other),
        }
    }

    async fn send_once(&self, message: &OutgoingMessage) -> Result<SendAttempt> {
        // Captured per send so rotated credentials apply to running campaigns
        let credentials = match self.ctx.settings.gateway_credentials().await {
            Ok(credentials) => credentials,
            Err(Error::Configuration(reason)) => {
                return Ok(SendAttempt::Done(Err(GatewayError::Configuration(reason))))
            }
            Err(e) => return Err(e),
        };

        Ok(tokio::select! {
            biased;
            _ = self.cancel.cancelled() => SendAttempt::Cancelled,
            result = self.ctx.gateway.send(&credentials, message) => SendAttempt::Done(result),
        })
    }

    async fn record(&self, recipient: &CampaignRecipient, outcome: &RecipientOutcome) -> Result<()> {
        let updated = self
            .ctx
            .repo
            .update_recipient(&self.campaign_id, recipient.id, outcome)
            .await?;
        if !updated {
            debug!(
                campaign_id = %self.campaign_id,
                recipient = %recipient.phone_number,
                "Recipient already terminal"
            );
        }
        Ok(())
    }

    async fn finish_cancelled(&self) -> Result<WorkerOutcome> {
        let (_, cancelled) = self.ctx.repo.cancel_campaign(&self.campaign_id).await?;
        info!(campaign_id = %self.campaign_id, cancelled, "Campaign cancelled");
        Ok(WorkerOutcome::Cancelled)
    }

    async fn finish_failed(&self, reason: String) -> Result<WorkerOutcome> {
        self.ctx
            .repo
            .update_status(&self.campaign_id, CampaignStatus::Failed)
            .await?;
        error!(campaign_id = %self.campaign_id, reason = %reason, "Campaign failed");
        Ok(WorkerOutcome::Failed(reason))
    }
}
