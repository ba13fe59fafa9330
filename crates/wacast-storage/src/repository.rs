//! Repository layer for data access

pub mod campaigns;
pub mod memory;
pub mod settings;

pub use campaigns::{CampaignRepository, DbCampaignRepository};
pub use memory::{InMemoryCampaignRepository, InMemorySettingsRepository};
pub use settings::{DbSettingsRepository, SettingsRepository};
