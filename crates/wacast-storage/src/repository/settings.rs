//! Gateway and CRM settings repository
//!
//! Both scopes keep history: saving inserts a new row and the newest row is
//! the effective one. Resetting removes the whole history.

use async_trait::async_trait;
use wacast_common::Result;

use crate::db::{map_sqlx, DatabasePool};
use crate::models::{CrmSettings, GatewaySettings, SaveCrmSettings, SaveGatewaySettings};

/// Settings repository trait
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn gateway_settings(&self) -> Result<Option<GatewaySettings>>;
    async fn save_gateway_settings(&self, input: SaveGatewaySettings) -> Result<GatewaySettings>;
    async fn reset_gateway_settings(&self) -> Result<u64>;

    async fn crm_settings(&self) -> Result<Option<CrmSettings>>;
    async fn save_crm_settings(&self, input: SaveCrmSettings) -> Result<CrmSettings>;
    async fn reset_crm_settings(&self) -> Result<u64>;
}

/// Database settings repository
pub struct DbSettingsRepository {
    pool: DatabasePool,
}

impl DbSettingsRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for DbSettingsRepository {
    async fn gateway_settings(&self) -> Result<Option<GatewaySettings>> {
        sqlx::query_as::<_, GatewaySettings>(
            "SELECT * FROM whatsgate_settings ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx)
    }

    async fn save_gateway_settings(&self, input: SaveGatewaySettings) -> Result<GatewaySettings> {
        // created_at tracks the first version so the history reads as one record
        sqlx::query_as::<_, GatewaySettings>(
            r#"
            INSERT INTO whatsgate_settings (whatsapp_id, api_key, base_url, created_at, updated_at)
            VALUES (
                $1, $2, $3,
                COALESCE((SELECT MIN(created_at) FROM whatsgate_settings), NOW()),
                NOW()
            )
            RETURNING *
            "#,
        )
        .bind(&input.whatsapp_id)
        .bind(&input.api_key)
        .bind(&input.base_url)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_sqlx)
    }

    async fn reset_gateway_settings(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM whatsgate_settings")
            .execute(self.pool.pool())
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn crm_settings(&self) -> Result<Option<CrmSettings>> {
        sqlx::query_as::<_, CrmSettings>(
            "SELECT * FROM retailcrm_settings ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx)
    }

    async fn save_crm_settings(&self, input: SaveCrmSettings) -> Result<CrmSettings> {
        sqlx::query_as::<_, CrmSettings>(
            r#"
            INSERT INTO retailcrm_settings (api_key, base_url, created_at, updated_at)
            VALUES (
                $1, $2,
                COALESCE((SELECT MIN(created_at) FROM retailcrm_settings), NOW()),
                NOW()
            )
            RETURNING *
            "#,
        )
        .bind(&input.api_key)
        .bind(&input.base_url)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_sqlx)
    }

    async fn reset_crm_settings(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM retailcrm_settings")
            .execute(self.pool.pool())
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}
