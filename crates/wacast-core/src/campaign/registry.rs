//! Registry of running campaign workers
//!
//! Maps a campaign id to the token that cancels its worker. The registry only
//! holds the ability to cancel; campaign state lives in the repository.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wacast_common::Error;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("campaign {0} is already running")]
    AlreadyActive(String),

    #[error("campaign {0} is not running")]
    NotActive(String),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::AlreadyActive(_) => "already_active",
            RegistryError::NotActive(_) => "not_active",
        }
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::conflict(e.code(), e.to_string())
    }
}

/// Campaign registry
#[derive(Default)]
pub struct CampaignRegistry {
    entries: RwLock<HashMap<String, CancellationToken>>,
}

impl CampaignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a running worker. At most one entry exists per campaign.
    pub fn register(&self, id: &str, token: CancellationToken) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(id) {
            return Err(RegistryError::AlreadyActive(id.to_string()));
        }
        entries.insert(id.to_string(), token);
        debug!(campaign_id = %id, "Campaign registered");
        Ok(())
    }

    /// Forget a worker. Idempotent; returns whether an entry was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            debug!(campaign_id = %id, "Campaign unregistered");
        }
        removed
    }

    /// Cancel a running worker and drop its entry
    pub fn cancel(&self, id: &str) -> Result<(), RegistryError> {
        let token = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| RegistryError::NotActive(id.to_string()))?;

        token.cancel();
        info!(campaign_id = %id, "Campaign cancellation requested");
        Ok(())
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Snapshot of running campaign ids, sorted
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Cancel every running worker; returns the cancelled ids, sorted
    pub fn cancel_all(&self) -> Vec<String> {
        let drained: Vec<(String, CancellationToken)> = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut ids = Vec::with_capacity(drained.len());
        for (id, token) in drained {
            token.cancel();
            ids.push(id);
        }
        ids.sort();

        if !ids.is_empty() {
            info!(count = ids.len(), "Cancelled all running campaigns");
        }
        ids
    }
}
