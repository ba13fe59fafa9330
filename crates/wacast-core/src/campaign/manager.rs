//! Campaign use-cases: create, start, cancel and inspect

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use wacast_common::types::CampaignStatus;
use wacast_common::{Error, Result};
use wacast_storage::{
    Campaign, CampaignDetails, CampaignListQuery, NewCampaign, NewMedia, RecipientCounts,
};

use super::pacing::Pacer;
use super::registry::{CampaignRegistry, RegistryError};
use super::worker::{CampaignWorker, WorkerContext, WorkerOutcome};
use crate::crm::{filter_by_category, CrmService};
use crate::gateway::UploadedMedia;
use crate::phone;
use crate::spreadsheet::{self, ParseStats};

/// Longest accepted cancel reason, in characters
pub const CANCEL_REASON_MAX_CHARS: usize = 500;

/// Input for creating a campaign
#[derive(Debug, Clone, Default)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub message: String,
    pub messages_per_hour: i32,
    /// Free-form list appended after the file's numbers
    pub additional_numbers: String,
    /// Free-form list removed from the audience
    pub exclude_numbers: String,
    pub initiator: Option<String>,
    pub selected_category_name: Option<String>,
    /// Uploaded spreadsheet
    pub file: Vec<u8>,
    pub media: Option<UploadedMedia>,
}

/// Result of a successful create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedCampaign {
    pub campaign: CampaignDetails,
    pub total_phones: usize,
    pub valid_phones: usize,
    pub invalid_phones: usize,
    pub stats: ParseStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedCampaign {
    pub campaign_id: String,
    pub status: CampaignStatus,
    pub total_numbers: i64,
    /// `None` for unpaced campaigns
    pub estimated_completion: Option<DateTime<Utc>>,
    pub worker_started: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelledCampaign {
    pub campaign_id: String,
    pub status: String,
    pub cancelled_numbers: i64,
    pub already_sent_numbers: i64,
    pub total_numbers: i64,
    /// Whether the worker wrote its terminal state before the reply
    pub worker_stopped: bool,
    pub reason: Option<String>,
}

/// Campaign aggregate with progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignView {
    #[serde(flatten)]
    pub details: CampaignDetails,
    pub counts: RecipientCounts,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPage {
    pub campaigns: Vec<Campaign>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

struct WorkerHandle {
    handle: JoinHandle<()>,
    done: watch::Receiver<Option<WorkerOutcome>>,
}

/// Campaign manager
pub struct CampaignManager {
    ctx: WorkerContext,
    crm: CrmService,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl CampaignManager {
    pub fn new(ctx: WorkerContext, crm: CrmService) -> Self {
        Self {
            ctx,
            crm,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &CampaignRegistry {
        &self.ctx.registry
    }

    /// Resolve the audience and persist a new pending campaign
    pub async fn create(&self, request: CreateCampaignRequest) -> Result<CreatedCampaign> {
        NewCampaign::validate_fields(&request.name, &request.message, request.messages_per_hour)?;

        let additional = phone::parse_list("additional_numbers", &request.additional_numbers)?;
        let excluded: HashSet<String> = phone::parse_list("exclude_numbers", &request.exclude_numbers)?
            .into_iter()
            .collect();

        let sheet = spreadsheet::parse_spreadsheet(&request.file)?;

        // File first, additional numbers appended, first occurrence wins
        let mut seen: HashSet<&str> = sheet.phones.iter().map(String::as_str).collect();
        let mut phones = sheet.phones.clone();
        for number in &additional {
            if seen.insert(number.as_str()) {
                phones.push(number.clone());
            }
        }
        phones.retain(|p| !excluded.contains(p));

        let category = request
            .selected_category_name
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        if let Some(category) = category {
            let results = filter_by_category(&self.crm, &phones, category, &CancellationToken::new()).await?;
            phones = results
                .into_iter()
                .filter(|r| r.should_send)
                .map(|r| r.phone_number)
                .collect();
        }

        if phones.is_empty() {
            return Err(Error::validation(
                "no_valid_phone_numbers",
                "no recipients left after applying exclusions and filters",
            ));
        }

        let id = Uuid::new_v4().to_string();

        let mut stored_media = None;
        let media = match &request.media {
            Some(upload) => {
                let path = self
                    .ctx
                    .media
                    .store_media(&id, &upload.filename, &upload.bytes)
                    .await?;
                stored_media = Some(path.clone());
                Some(NewMedia {
                    filename: upload.filename.clone(),
                    mime_type: upload.mime_type.clone(),
                    message_type: upload.message_type(),
                    size: upload.size() as i64,
                    checksum_md5: upload.checksum_md5(),
                    storage_path: path,
                })
            }
            None => None,
        };

        let input = NewCampaign {
            id: id.clone(),
            name: request.name.trim().to_string(),
            message: request.message,
            messages_per_hour: request.messages_per_hour,
            initiator: request.initiator.filter(|i| !i.trim().is_empty()),
            media,
            phone_numbers: phones,
        };

        let details = match self.ctx.repo.create(input).await {
            Ok(details) => details,
            Err(e) => {
                if let Some(path) = stored_media {
                    if let Err(cleanup) = self.ctx.media.delete_media(&path).await {
                        warn!(campaign_id = %id, error = %cleanup, "Failed to remove orphaned media");
                    }
                }
                return Err(e);
            }
        };

        info!(
            campaign_id = %id,
            recipients = details.recipients.len(),
            invalid = sheet.stats.invalid,
            duplicates = sheet.stats.duplicate,
            "Campaign created"
        );

        Ok(CreatedCampaign {
            total_phones: sheet.stats.data_rows + additional.len(),
            valid_phones: details.recipients.len(),
            invalid_phones: sheet.stats.invalid,
            stats: sheet.stats,
            campaign: details,
        })
    }

    /// Register and launch the worker for a pending campaign. Returns as soon
    /// as the worker is spawned.
    pub async fn start(&self, id: &str) -> Result<StartedCampaign> {
        let campaign = self.load(id).await?;
        campaign.check_transition(CampaignStatus::Started)?;

        let cancel = CancellationToken::new();
        self.ctx.registry.register(id, cancel.clone())?;

        let campaign = match self.ctx.repo.update_status(id, CampaignStatus::Started).await {
            Ok(campaign) => campaign,
            Err(e) => {
                self.ctx.registry.unregister(id);
                return Err(e);
            }
        };

        self.spawn_worker(id, cancel);

        let pending = u32::try_from(campaign.total_count).unwrap_or(0);
        let estimated_completion = Pacer::new(campaign.messages_per_hour)
            .estimate(pending)
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        info!(campaign_id = %id, total = campaign.total_count, "Campaign started");

        Ok(StartedCampaign {
            campaign_id: campaign.id,
            status: CampaignStatus::Started,
            total_numbers: i64::from(campaign.total_count),
            estimated_completion,
            worker_started: true,
        })
    }

    /// Stop a campaign. A running worker is signalled and awaited for a
    /// bounded time; a campaign without a worker is finalised directly.
    pub async fn cancel(&self, id: &str, reason: Option<String>) -> Result<CancelledCampaign> {
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        if reason
            .as_ref()
            .is_some_and(|r| r.chars().count() > CANCEL_REASON_MAX_CHARS)
        {
            return Err(Error::invalid_field(
                "reason",
                format!("reason must be at most {} characters", CANCEL_REASON_MAX_CHARS),
            ));
        }

        self.load(id).await?;

        let worker_stopped = match self.ctx.registry.cancel(id) {
            Ok(()) => self.wait_for_worker(id).await,
            Err(RegistryError::NotActive(_)) => {
                // An earlier cancel already signalled this worker; it owns
                // the terminal write
                if self.worker_running(id) {
                    return Err(RegistryError::NotActive(id.to_string()).into());
                }
                // Re-read: a worker may have finished since the first load
                let campaign = self.load(id).await?;
                match campaign.status_enum() {
                    Some(CampaignStatus::Pending) | Some(CampaignStatus::Started) => {
                        match self.ctx.repo.cancel_campaign(id).await {
                            Ok(_) => true,
                            Err(Error::InvalidTransition { .. }) => {
                                return Err(RegistryError::NotActive(id.to_string()).into())
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    _ => return Err(RegistryError::NotActive(id.to_string()).into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let campaign = self.load(id).await?;
        let counts = self.ctx.repo.recipient_counts(id).await?;

        info!(
            campaign_id = %id,
            reason = reason.as_deref().unwrap_or(""),
            cancelled = counts.cancelled,
            worker_stopped,
            "Campaign cancel handled"
        );

        Ok(CancelledCampaign {
            campaign_id: campaign.id,
            status: campaign.status,
            cancelled_numbers: counts.cancelled,
            already_sent_numbers: counts.sent,
            total_numbers: counts.total(),
            worker_stopped,
            reason,
        })
    }

    pub async fn get(&self, id: &str) -> Result<CampaignView> {
        let details = self
            .ctx
            .repo
            .get_details(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("campaign {}", id)))?;
        let counts = details.counts();

        Ok(CampaignView {
            progress_percent: counts.progress_percent(),
            counts,
            details,
        })
    }

    pub async fn list(&self, query: CampaignListQuery) -> Result<CampaignPage> {
        query.validate()?;
        let (campaigns, total) = self.ctx.repo.list(&query).await?;

        Ok(CampaignPage {
            campaigns,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    /// Ids of campaigns with a live worker
    pub fn active(&self) -> Vec<String> {
        self.ctx.registry.active()
    }

    /// Signal every running worker; each finalises its own campaign
    pub fn cancel_all(&self) -> Vec<String> {
        self.ctx.registry.cancel_all()
    }

    /// Respawn workers for campaigns left `started` by a previous process
    pub async fn resume_started(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();

        for campaign in self.ctx.repo.list_by_status(CampaignStatus::Started).await? {
            let cancel = CancellationToken::new();
            if let Err(e) = self.ctx.registry.register(&campaign.id, cancel.clone()) {
                warn!(campaign_id = %campaign.id, error = %e, "Skipping resume");
                continue;
            }
            self.spawn_worker(&campaign.id, cancel);
            resumed.push(campaign.id);
        }

        if !resumed.is_empty() {
            info!(count = resumed.len(), "Resumed interrupted campaigns");
        }
        Ok(resumed)
    }

    /// Stop every worker without touching storage so the campaigns resume
    /// on the next start
    pub fn abort_all(&self) {
        let workers: Vec<(String, WorkerHandle)> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (id, worker) in workers {
            worker.handle.abort();
            self.ctx.registry.unregister(&id);
        }
    }

    async fn load(&self, id: &str) -> Result<Campaign> {
        self.ctx
            .repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("campaign {}", id)))
    }

    fn spawn_worker(&self, id: &str, cancel: CancellationToken) {
        let worker = CampaignWorker::new(self.ctx.clone(), id, cancel);
        let (done_tx, done_rx) = watch::channel(None);

        let handle = tokio::spawn(async move {
            let outcome = worker.run().await;
            let _ = done_tx.send(Some(outcome));
        });

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|_, w| !w.handle.is_finished());
        workers.insert(
            id.to_string(),
            WorkerHandle {
                handle,
                done: done_rx,
            },
        );
    }

    /// Whether a spawned worker for `id` has not yet reported its outcome
    fn worker_running(&self, id: &str) -> bool {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|w| !w.handle.is_finished() && w.done.borrow().is_none())
    }

    async fn wait_for_worker(&self, id: &str) -> bool {
        let done = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|w| w.done.clone());
        let Some(mut done) = done else {
            return false;
        };

        let wait = Duration::from_secs(self.ctx.config.cancel_wait_secs);
        let stopped = matches!(
            tokio::time::timeout(wait, done.wait_for(Option::is_some)).await,
            Ok(Ok(_))
        );
        if !stopped {
            warn!(campaign_id = %id, "Worker did not stop within the cancel wait");
        }
        stopped
    }
}
