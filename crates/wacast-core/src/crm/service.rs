//! CRM access bound to the stored credentials

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wacast_common::config::SettingsConfig;

use super::client::{CrmClient, CrmCredentials, CrmError, Product};
use crate::settings::SettingsService;

/// CRM operations using the current settings.
///
/// A credential failure drops the cached settings and retries with freshly
/// loaded ones, a bounded number of times.
#[derive(Clone)]
pub struct CrmService {
    client: CrmClient,
    settings: Arc<SettingsService>,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl CrmService {
    pub fn new(client: CrmClient, settings: Arc<SettingsService>, config: &SettingsConfig) -> Self {
        Self {
            client,
            settings,
            retry_attempts: config.crm_retry_attempts,
            retry_backoff: Duration::from_millis(config.crm_retry_backoff_ms),
        }
    }

    async fn with_credentials<T, F, Fut>(&self, op: F) -> Result<T, CrmError>
    where
        F: Fn(CrmCredentials) -> Fut,
        Fut: Future<Output = Result<T, CrmError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match self.settings.crm_credentials().await {
                Ok(credentials) => op(credentials).await,
                Err(e) => Err(CrmError::Configuration(e.to_string())),
            };

            match result {
                Err(e) if e.is_credential_error() && attempt < self.retry_attempts => {
                    attempt += 1;
                    warn!(error = %e, attempt, "CRM credentials rejected, reloading settings");
                    self.settings.invalidate_crm().await;
                    tokio::time::sleep(self.retry_backoff).await;
                }
                other => return other,
            }
        }
    }

    /// Active product groups
    pub async fn product_groups(&self, cancel: &CancellationToken) -> Result<Vec<Product>, CrmError> {
        self.with_credentials(|creds| async move { self.client.product_groups(&creds, cancel).await })
            .await
    }

    pub async fn products_in_group(
        &self,
        group_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Product>, CrmError> {
        self.with_credentials(|creds| async move {
            self.client.products_in_group(&creds, group_name, cancel).await
        })
        .await
    }

    pub async fn products_by_phone(
        &self,
        phone: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Product>, CrmError> {
        self.with_credentials(|creds| async move {
            self.client.products_by_phone(&creds, phone, cancel).await
        })
        .await
    }
}
