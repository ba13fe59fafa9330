//! Campaign execution
//!
//! The registry tracks which campaigns have a live worker, the worker drives
//! one campaign through its recipients, and the manager exposes the
//! operator-facing use-cases on top of both.

pub mod manager;
pub mod pacing;
pub mod registry;
pub mod worker;

pub use manager::{
    CampaignManager, CampaignPage, CampaignView, CancelledCampaign, CreateCampaignRequest,
    CreatedCampaign, StartedCampaign, CANCEL_REASON_MAX_CHARS,
};
pub use pacing::Pacer;
pub use registry::{CampaignRegistry, RegistryError};
pub use worker::{CampaignWorker, WorkerContext, WorkerOutcome};
