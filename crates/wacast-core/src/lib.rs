//! Wacast Core - campaign engine and audience pipeline
//!
//! This crate turns an uploaded spreadsheet into a campaign audience, paces
//! delivery through the WhatsApp gateway, and talks to RetailCRM when an
//! audience is narrowed by purchase history.

pub mod campaign;
pub mod crm;
pub mod gateway;
pub mod phone;
pub mod settings;
pub mod spreadsheet;

pub use campaign::{
    CampaignManager, CampaignRegistry, CampaignWorker, CreateCampaignRequest, Pacer,
    WorkerContext, WorkerOutcome,
};
pub use crm::{CrmClient, CrmService, FilterResult};
pub use gateway::{GatewayClient, UploadedMedia};
pub use send_test::{send_test_message, TestMessageResult};
pub use settings::SettingsService;
pub use spreadsheet::{parse_spreadsheet, ParseStats, ParsedSheet};
