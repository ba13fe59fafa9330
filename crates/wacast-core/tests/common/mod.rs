//! Shared fixtures for campaign integration tests

#![allow(dead_code)]

use rust_xlsxwriter::Workbook;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wacast_common::config::{CrmConfig, GatewayConfig, SettingsConfig, WorkerConfig};
use wacast_common::types::CampaignStatus;
use wacast_core::campaign::{CampaignManager, CampaignRegistry, WorkerContext};
use wacast_core::crm::{CrmClient, CrmService};
use wacast_core::gateway::GatewayClient;
use wacast_core::settings::SettingsService;
use wacast_storage::{
    Campaign, CampaignRepository, InMemoryCampaignRepository, InMemorySettingsRepository,
    LocalStorage, MediaStorage, SaveCrmSettings, SaveGatewaySettings, SettingsRepository,
};
use wiremock::MockServer;

pub struct Harness {
    pub manager: Arc<CampaignManager>,
    pub repo: Arc<InMemoryCampaignRepository>,
    pub settings_repo: Arc<InMemorySettingsRepository>,
    pub media_dir: TempDir,
}

impl Harness {
    /// Service wired to in-memory storage with the gateway at `gateway_url`
    pub async fn new(gateway_url: &str) -> Self {
        Self::with_gateway(gateway_url, GatewayConfig::default()).await
    }

    pub async fn with_gateway(gateway_url: &str, gateway_config: GatewayConfig) -> Self {
        let repo = Arc::new(InMemoryCampaignRepository::new());
        let settings_repo = Arc::new(InMemorySettingsRepository::new());
        settings_repo
            .save_gateway_settings(SaveGatewaySettings {
                whatsapp_id: "wa-test".into(),
                api_key: "gateway-key".into(),
                base_url: gateway_url.into(),
            })
            .await
            .unwrap();

        let settings_config = SettingsConfig {
            crm_retry_backoff_ms: 10,
            ..SettingsConfig::default()
        };
        let settings = Arc::new(SettingsService::new(
            settings_repo.clone(),
            &settings_config,
            &GatewayConfig::default(),
        ));

        let media_dir = TempDir::new().unwrap();
        let media = MediaStorage::new(Arc::new(LocalStorage::from_path(media_dir.path()).unwrap()));

        let ctx = WorkerContext {
            repo: repo.clone(),
            settings: settings.clone(),
            gateway: GatewayClient::new(&gateway_config).unwrap(),
            media,
            registry: Arc::new(CampaignRegistry::new()),
            config: WorkerConfig {
                retry_backoff_ms: 10,
                unauthorized_threshold: 3,
                cancel_wait_secs: 5,
            },
        };
        let crm = CrmService::new(
            CrmClient::new(&CrmConfig::default()).unwrap(),
            settings,
            &settings_config,
        );

        Self {
            manager: Arc::new(CampaignManager::new(ctx, crm)),
            repo,
            settings_repo,
            media_dir,
        }
    }

    pub async fn with_crm(self, crm: &MockServer) -> Self {
        self.settings_repo
            .save_crm_settings(SaveCrmSettings {
                api_key: "crm-key".into(),
                base_url: crm.uri(),
            })
            .await
            .unwrap();
        self
    }

    /// Poll until the campaign reaches a terminal status
    pub async fn wait_terminal(&self, id: &str, timeout: Duration) -> Campaign {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let campaign = self.repo.get(id).await.unwrap().unwrap();
            if campaign.status_enum().is_some_and(|s| s.is_terminal()) {
                return campaign;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "campaign {} still {} after {:?}",
                id,
                campaign.status,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until at least `sent` recipients are recorded as sent
    pub async fn wait_sent(&self, id: &str, sent: i64, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.repo.recipient_counts(id).await.unwrap().sent < sent {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for sends");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the registry no longer lists the campaign
    pub async fn wait_inactive(&self, id: &str, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.manager.registry().is_active(id) {
            assert!(tokio::time::Instant::now() < deadline, "worker for {} still registered", id);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Single-sheet workbook with `header` over one column of `values`
pub fn workbook(header: &str, values: &[&str]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.write_string(0, 0, header).unwrap();
    for (i, value) in values.iter().enumerate() {
        worksheet.write_string(i as u32 + 1, 0, *value).unwrap();
    }
    workbook.save_to_buffer().unwrap()
}

/// `count` distinct canonical numbers
pub fn numbers(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("791600000{:02}", i)).collect()
}
