use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use super::{ConversationSink, LeadStore};
use crate::{
    error::StoreError,
    types::{ConversationMessage, IdentityField, Lead, LeadStage, LogOutcome, NewLead},
};

const LEAD_COLUMNS: &str = "id, display_name, avatar_url, line_user_id, facebook_psid, \
     instagram_sid, stage, source, note, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn parse_lead_row(row: PgRow) -> Result<Lead, StoreError> {
    let stage_raw: String = row.try_get("stage")?;
    let Some(stage) = LeadStage::parse(&stage_raw) else {
        return Err(StoreError::CorruptRow {
            table: "leads",
            detail: format!("unknown stage {stage_raw:?}"),
        });
    };
    Ok(Lead {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        avatar_url: row.try_get("avatar_url")?,
        line_user_id: row.try_get("line_user_id")?,
        facebook_psid: row.try_get("facebook_psid")?,
        instagram_sid: row.try_get("instagram_sid")?,
        stage,
        source: row.try_get("source")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl LeadStore for PgStore {
    async fn find_by_identity(
        &self,
        field: IdentityField,
        external_id: &str,
    ) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE {} = $1 LIMIT 1",
            field.column()
        ))
        .bind(external_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(parse_lead_row).transpose()
    }

    async fn insert_if_absent(&self, lead: &NewLead) -> Result<Option<Lead>, StoreError> {
        let column = lead.channel.identity_field().column();
        let row = sqlx::query(&format!(
            "INSERT INTO leads \
             (id, display_name, avatar_url, {column}, stage, source, note, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) \
             ON CONFLICT ({column}) DO NOTHING \
             RETURNING {LEAD_COLUMNS}"
        ))
        .bind(&lead.id)
        .bind(&lead.display_name)
        .bind(&lead.avatar_url)
        .bind(&lead.external_user_id)
        .bind(LeadStage::New.as_str())
        .bind(lead.channel.as_str())
        .bind(&lead.note)
        .bind(&lead.created_at)
        .bind(&lead.created_at)
        .fetch_optional(&self.db)
        .await?;
        row.map(parse_lead_row).transpose()
    }
}

#[async_trait]
impl ConversationSink for PgStore {
    async fn append(&self, message: &ConversationMessage) -> Result<LogOutcome, StoreError> {
        let raw_payload =
            serde_json::to_string(&message.raw_payload).unwrap_or_else(|_| "{}".to_string());
        let result = sqlx::query(
            "INSERT INTO conversation_messages \
             (id, lead_id, channel, external_message_id, content, raw_payload, direction, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8) \
             ON CONFLICT (channel, external_message_id) DO NOTHING",
        )
        .bind(&message.id)
        .bind(&message.lead_id)
        .bind(message.channel.as_str())
        .bind(&message.external_message_id)
        .bind(&message.content)
        .bind(raw_payload)
        .bind(message.direction.as_str())
        .bind(&message.created_at)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            Ok(LogOutcome::Duplicate)
        } else {
            Ok(LogOutcome::Inserted)
        }
    }
}
