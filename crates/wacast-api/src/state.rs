//! Shared handler state

use std::sync::Arc;
use wacast_core::{CampaignManager, CrmService, GatewayClient, SettingsService};
use wacast_storage::CampaignRepository;

/// Application state handed to every handler
pub struct AppState {
    pub campaigns: Arc<CampaignManager>,
    /// Used directly by readiness checks
    pub campaign_repo: Arc<dyn CampaignRepository>,
    pub settings: Arc<SettingsService>,
    pub gateway: GatewayClient,
    pub crm: CrmService,
    /// Request body ceiling for uploads
    pub max_upload_bytes: usize,
}
