//! Cached access to gateway and CRM credentials
//!
//! Settings are read on every send, so they are cached in-process with a
//! TTL. Writes go straight to the repository and drop the cached value.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};
use wacast_common::config::{GatewayConfig, SettingsConfig};
use wacast_common::{Error, Result};
use wacast_storage::models::{CrmSettings, GatewaySettings, SaveCrmSettings, SaveGatewaySettings};
use wacast_storage::repository::SettingsRepository;

use crate::crm::CrmCredentials;
use crate::gateway::GatewayCredentials;

struct CacheEntry<T> {
    value: Option<T>,
    loaded_at: Instant,
}

/// Settings service
pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
    ttl: Duration,
    default_gateway_url: String,
    gateway: RwLock<Option<CacheEntry<GatewaySettings>>>,
    crm: RwLock<Option<CacheEntry<CrmSettings>>>,
}

impl SettingsService {
    pub fn new(
        repo: Arc<dyn SettingsRepository>,
        config: &SettingsConfig,
        gateway: &GatewayConfig,
    ) -> Self {
        Self {
            repo,
            ttl: Duration::from_secs(config.cache_ttl_secs),
            default_gateway_url: gateway.default_base_url.clone(),
            gateway: RwLock::new(None),
            crm: RwLock::new(None),
        }
    }

    /// Base URL used when no gateway URL was saved
    pub fn default_gateway_url(&self) -> &str {
        &self.default_gateway_url
    }

    /// Current gateway settings, if any were saved
    pub async fn gateway_settings(&self) -> Result<Option<GatewaySettings>> {
        {
            let cache = self.gateway.read().await;
            if let Some(entry) = cache.as_ref().filter(|e| e.loaded_at.elapsed() < self.ttl) {
                return Ok(entry.value.clone());
            }
        }

        let mut cache = self.gateway.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(entry) = cache.as_ref().filter(|e| e.loaded_at.elapsed() < self.ttl) {
            return Ok(entry.value.clone());
        }

        debug!("Loading gateway settings");
        let value = self.repo.gateway_settings().await?;
        *cache = Some(CacheEntry {
            value: value.clone(),
            loaded_at: Instant::now(),
        });
        Ok(value)
    }

    /// Credentials for the next gateway send
    pub async fn gateway_credentials(&self) -> Result<GatewayCredentials> {
        let settings = self.gateway_settings().await?.ok_or_else(|| {
            Error::Configuration("WhatsApp gateway settings are not configured".to_string())
        })?;

        let base_url = if settings.base_url.trim().is_empty() {
            self.default_gateway_url.clone()
        } else {
            settings.base_url
        };

        Ok(GatewayCredentials {
            whatsapp_id: settings.whatsapp_id,
            api_key: Some(settings.api_key).filter(|k| !k.is_empty()),
            base_url,
        })
    }

    pub async fn save_gateway_settings(&self, mut input: SaveGatewaySettings) -> Result<GatewaySettings> {
        input.whatsapp_id = input.whatsapp_id.trim().to_string();
        input.api_key = input.api_key.trim().to_string();
        input.base_url = normalize_base_url(&input.base_url);
        if input.base_url.is_empty() {
            input.base_url = self.default_gateway_url.clone();
        }

        require("whatsapp_id", &input.whatsapp_id)?;
        require("api_key", &input.api_key)?;
        validate_url("base_url", &input.base_url)?;

        let saved = self.repo.save_gateway_settings(input).await?;
        self.invalidate_gateway().await;
        info!(whatsapp_id = %saved.whatsapp_id, "Gateway settings updated");
        Ok(saved)
    }

    pub async fn reset_gateway_settings(&self) -> Result<u64> {
        let removed = self.repo.reset_gateway_settings().await?;
        self.invalidate_gateway().await;
        info!(removed, "Gateway settings reset");
        Ok(removed)
    }

    /// Current CRM settings, if any were saved
    pub async fn crm_settings(&self) -> Result<Option<CrmSettings>> {
        {
            let cache = self.crm.read().await;
            if let Some(entry) = cache.as_ref().filter(|e| e.loaded_at.elapsed() < self.ttl) {
                return Ok(entry.value.clone());
            }
        }

        let mut cache = self.crm.write().await;
        if let Some(entry) = cache.as_ref().filter(|e| e.loaded_at.elapsed() < self.ttl) {
            return Ok(entry.value.clone());
        }

        debug!("Loading CRM settings");
        let value = self.repo.crm_settings().await?;
        *cache = Some(CacheEntry {
            value: value.clone(),
            loaded_at: Instant::now(),
        });
        Ok(value)
    }

    pub async fn crm_credentials(&self) -> Result<CrmCredentials> {
        let settings = self
            .crm_settings()
            .await?
            .ok_or_else(|| Error::Configuration("CRM settings are not configured".to_string()))?;

        Ok(CrmCredentials {
            api_key: settings.api_key,
            base_url: settings.base_url,
        })
    }

    pub async fn save_crm_settings(&self, mut input: SaveCrmSettings) -> Result<CrmSettings> {
        input.api_key = input.api_key.trim().to_string();
        input.base_url = normalize_base_url(&input.base_url);

        require("api_key", &input.api_key)?;
        validate_url("base_url", &input.base_url)?;

        let saved = self.repo.save_crm_settings(input).await?;
        self.invalidate_crm().await;
        info!(base_url = %saved.base_url, "CRM settings updated");
        Ok(saved)
    }

    pub async fn reset_crm_settings(&self) -> Result<u64> {
        let removed = self.repo.reset_crm_settings().await?;
        self.invalidate_crm().await;
        info!(removed, "CRM settings reset");
        Ok(removed)
    }

    pub async fn invalidate_gateway(&self) {
        *self.gateway.write().await = None;
    }

    pub async fn invalidate_crm(&self) {
        *self.crm.write().await = None;
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_field(field, format!("{} is required", field)));
    }
    Ok(())
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let valid = reqwest::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false);
    if !valid {
        return Err(Error::invalid_field(
            field,
            format!("{} must be an absolute http(s) URL", field),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wacast_storage::repository::InMemorySettingsRepository;

    fn service(repo: Arc<InMemorySettingsRepository>) -> SettingsService {
        SettingsService::new(repo, &SettingsConfig::default(), &GatewayConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl() {
        let repo = Arc::new(InMemorySettingsRepository::new());
        let settings = service(repo.clone());

        assert!(settings.gateway_settings().await.unwrap().is_none());

        // Written behind the service's back: invisible until the TTL expires
        repo.save_gateway_settings(SaveGatewaySettings {
            whatsapp_id: "wa".into(),
            api_key: "k".into(),
            base_url: "https://gw.example/api/v1".into(),
        })
        .await
        .unwrap();
        assert!(settings.gateway_settings().await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            settings.gateway_settings().await.unwrap().unwrap().whatsapp_id,
            "wa"
        );
    }

    #[tokio::test]
    async fn test_save_invalidates_and_defaults_url() {
        let repo = Arc::new(InMemorySettingsRepository::new());
        let settings = service(repo);

        let err = settings.gateway_credentials().await.unwrap_err();
        assert_eq!(err.kind(), "configuration");

        settings
            .save_gateway_settings(SaveGatewaySettings {
                whatsapp_id: " wa-1 ".into(),
                api_key: "key".into(),
                base_url: "".into(),
            })
            .await
            .unwrap();

        let creds = settings.gateway_credentials().await.unwrap();
        assert_eq!(creds.whatsapp_id, "wa-1");
        assert_eq!(creds.api_key.as_deref(), Some("key"));
        assert_eq!(creds.base_url, "https://whatsgate.ru/api/v1");

        settings.reset_gateway_settings().await.unwrap();
        assert!(settings.gateway_credentials().await.is_err());
    }

    #[tokio::test]
    async fn test_crm_validation() {
        let settings = service(Arc::new(InMemorySettingsRepository::new()));

        let err = settings
            .save_crm_settings(SaveCrmSettings {
                api_key: "k".into(),
                base_url: "shop.example".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("base_url"));

        let saved = settings
            .save_crm_settings(SaveCrmSettings {
                api_key: "k".into(),
                base_url: "https://shop.example/".into(),
            })
            .await
            .unwrap();
        assert_eq!(saved.base_url, "https://shop.example");
        assert_eq!(settings.crm_credentials().await.unwrap().api_key, "k");
    }
}
