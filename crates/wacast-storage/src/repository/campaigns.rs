//! Campaign repository

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;
use wacast_common::types::{CampaignStatus, MediaId, RecipientId, RecipientStatus};
use wacast_common::{Error, Result};

use crate::db::{map_sqlx, DatabasePool};
use crate::models::{
    Campaign, CampaignDetails, CampaignListQuery, CampaignMedia, CampaignRecipient, NewCampaign,
    RecipientCounts, RecipientOutcome,
};

/// Rows per multi-row INSERT when persisting recipients
const RECIPIENT_INSERT_CHUNK: usize = 1000;

/// Campaign repository trait.
///
/// Every write that targets a single campaign is serialised against the
/// campaign row, so state-machine checks and counter updates never race.
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Insert the campaign, its optional media and every recipient atomically
    async fn create(&self, input: NewCampaign) -> Result<CampaignDetails>;

    async fn get(&self, id: &str) -> Result<Option<Campaign>>;

    /// Hydrate the aggregate with media and recipients in insertion order
    async fn get_details(&self, id: &str) -> Result<Option<CampaignDetails>>;

    /// Page through campaigns, newest first; returns the page and the total
    async fn list(&self, query: &CampaignListQuery) -> Result<(Vec<Campaign>, i64)>;

    /// All campaigns currently in `status`, oldest first
    async fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>>;

    /// Move the campaign along the state machine
    async fn update_status(&self, id: &str, status: CampaignStatus) -> Result<Campaign>;

    /// Write a terminal outcome to a still pending recipient and increment the
    /// processed and error counters in the same transaction. Returns `false`
    /// when the row was already terminal.
    async fn update_recipient(
        &self,
        campaign_id: &str,
        recipient_id: RecipientId,
        outcome: &RecipientOutcome,
    ) -> Result<bool>;

    /// Pending recipients in insertion order
    async fn pending_recipients(&self, campaign_id: &str) -> Result<Vec<CampaignRecipient>>;

    /// Cancel every pending recipient and move the campaign to `cancelled`
    /// atomically. Returns the campaign and how many recipients changed.
    async fn cancel_campaign(&self, id: &str) -> Result<(Campaign, u64)>;

    async fn recipient_counts(&self, campaign_id: &str) -> Result<RecipientCounts>;

    async fn get_media(&self, id: MediaId) -> Result<Option<CampaignMedia>>;

    /// Storage round-trip for readiness checks
    async fn health_check(&self) -> Result<()>;
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Take the row lock on a campaign for the rest of the transaction
    async fn lock_campaign(tx: &mut Transaction<'_, Postgres>, id: &str) -> Result<Campaign> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| Error::NotFound(format!("campaign {}", id)))
    }

    async fn bump_counters(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
        processed: i32,
        errors: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                processed_count = processed_count + $2,
                error_count = error_count + $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(processed)
        .bind(errors)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("campaign {}", id)));
        }
        Ok(())
    }

    async fn insert_recipients(
        tx: &mut Transaction<'_, Postgres>,
        campaign_id: &str,
        phones: &[String],
    ) -> Result<()> {
        for (chunk_index, chunk) in phones.chunks(RECIPIENT_INSERT_CHUNK).enumerate() {
            let offset = chunk_index * RECIPIENT_INSERT_CHUNK;
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO campaign_recipients (id, campaign_id, position, phone_number, status) ",
            );
            builder.push_values(chunk.iter().enumerate(), |mut row, (i, phone)| {
                row.push_bind(Uuid::new_v4())
                    .push_bind(campaign_id)
                    .push_bind((offset + i) as i32)
                    .push_bind(phone)
                    .push_bind(RecipientStatus::Pending.as_str());
            });
            builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: NewCampaign) -> Result<CampaignDetails> {
        input.validate()?;

        let mut tx = self.pool.pool().begin().await.map_err(map_sqlx)?;

        let media_id = match &input.media {
            Some(media) => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO campaign_media
                        (id, filename, mime_type, message_type, size, checksum_md5, storage_path)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(id)
                .bind(&media.filename)
                .bind(&media.mime_type)
                .bind(media.message_type.as_str())
                .bind(media.size)
                .bind(&media.checksum_md5)
                .bind(&media.storage_path)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
                Some(id)
            }
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO campaigns
                (id, name, message, status, total_count, messages_per_hour, initiator, media_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&input.id)
        .bind(&input.name)
        .bind(&input.message)
        .bind(CampaignStatus::Pending.as_str())
        .bind(input.phone_numbers.len() as i32)
        .bind(input.messages_per_hour)
        .bind(&input.initiator)
        .bind(media_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| match map_sqlx(e) {
            Error::Conflict { .. } => {
                Error::conflict("duplicate_id", format!("campaign {} already exists", input.id))
            }
            other => other,
        })?;

        Self::insert_recipients(&mut tx, &input.id, &input.phone_numbers).await?;

        tx.commit().await.map_err(map_sqlx)?;

        self.get_details(&input.id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to create campaign".to_string()))
    }

    async fn get(&self, id: &str) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_sqlx)
    }

    async fn get_details(&self, id: &str) -> Result<Option<CampaignDetails>> {
        let campaign = match self.get(id).await? {
            Some(c) => c,
            None => return Ok(None),
        };

        let media = match campaign.media_id {
            Some(media_id) => self.get_media(media_id).await?,
            None => None,
        };

        let recipients = sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients WHERE campaign_id = $1 ORDER BY position ASC",
        )
        .bind(id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(Some(CampaignDetails {
            campaign,
            media,
            recipients,
        }))
    }

    async fn list(&self, query: &CampaignListQuery) -> Result<(Vec<Campaign>, i64)> {
        query.validate()?;
        let status = query.status.map(|s| s.as_str());

        let campaigns = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx)?;

        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM campaigns WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_sqlx)?;

        Ok((campaigns, total.0))
    }

    async fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx)
    }

    async fn update_status(&self, id: &str, status: CampaignStatus) -> Result<Campaign> {
        let mut tx = self.pool.pool().begin().await.map_err(map_sqlx)?;

        let current = Self::lock_campaign(&mut tx, id).await?;
        current.check_transition(status)?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                started_at = CASE WHEN $3 THEN NOW() ELSE started_at END,
                finished_at = CASE WHEN $4 THEN NOW() ELSE finished_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(status == CampaignStatus::Started)
        .bind(status.is_terminal())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(campaign)
    }

    async fn update_recipient(
        &self,
        campaign_id: &str,
        recipient_id: RecipientId,
        outcome: &RecipientOutcome,
    ) -> Result<bool> {
        outcome.validate()?;

        let mut tx = self.pool.pool().begin().await.map_err(map_sqlx)?;
        Self::lock_campaign(&mut tx, campaign_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                status = $3,
                error = $4,
                gateway_message_id = $5,
                sent_at = $6
            WHERE campaign_id = $1 AND id = $2 AND status = 'pending'
            "#,
        )
        .bind(campaign_id)
        .bind(recipient_id)
        .bind(outcome.status.as_str())
        .bind(&outcome.error)
        .bind(&outcome.gateway_message_id)
        .bind(outcome.sent_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let updated = result.rows_affected() == 1;
        if updated {
            let (processed, errors) = outcome.counter_deltas();
            Self::bump_counters(&mut tx, campaign_id, processed, errors).await?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(updated)
    }

    async fn pending_recipients(&self, campaign_id: &str) -> Result<Vec<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>(
            r#"
            SELECT * FROM campaign_recipients
            WHERE campaign_id = $1 AND status = 'pending'
            ORDER BY position ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx)
    }

    async fn cancel_campaign(&self, id: &str) -> Result<(Campaign, u64)> {
        let mut tx = self.pool.pool().begin().await.map_err(map_sqlx)?;

        let current = Self::lock_campaign(&mut tx, id).await?;
        current.check_transition(CampaignStatus::Cancelled)?;

        let cancelled = sqlx::query(
            r#"
            UPDATE campaign_recipients SET status = 'cancelled'
            WHERE campaign_id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?
        .rows_affected();

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                processed_count = processed_count + $3,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(CampaignStatus::Cancelled.as_str())
        .bind(cancelled as i32)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok((campaign, cancelled))
    }

    async fn recipient_counts(&self, campaign_id: &str) -> Result<RecipientCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM campaign_recipients
            WHERE campaign_id = $1
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx)?;

        let mut counts = RecipientCounts::default();
        for (status, n) in rows {
            counts.add(status.parse().ok(), n);
        }
        Ok(counts)
    }

    async fn get_media(&self, id: MediaId) -> Result<Option<CampaignMedia>> {
        sqlx::query_as::<_, CampaignMedia>("SELECT * FROM campaign_media WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_sqlx)
    }

    async fn health_check(&self) -> Result<()> {
        self.pool.health_check().await
    }
}
