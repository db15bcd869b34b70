use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ConversationSink, LeadStore};
use crate::{
    error::StoreError,
    types::{ConversationMessage, IdentityField, Lead, LogOutcome, NewLead},
};

#[derive(Default)]
struct Tables {
    leads: Vec<Lead>,
    messages: Vec<ConversationMessage>,
}

/// In-process store with the same uniqueness rules as the Postgres schema.
/// Used by tests and local runs without a database.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn leads(&self) -> Vec<Lead> {
        self.tables.lock().await.leads.clone()
    }

    pub async fn messages(&self) -> Vec<ConversationMessage> {
        self.tables.lock().await.messages.clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn find_by_identity(
        &self,
        field: IdentityField,
        external_id: &str,
    ) -> Result<Option<Lead>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .leads
            .iter()
            .find(|lead| lead.external_id(field) == Some(external_id))
            .cloned())
    }

    async fn insert_if_absent(&self, lead: &NewLead) -> Result<Option<Lead>, StoreError> {
        self.check_available()?;
        let field = lead.channel.identity_field();
        let mut tables = self.tables.lock().await;
        let taken = tables
            .leads
            .iter()
            .any(|existing| existing.external_id(field) == Some(lead.external_user_id.as_str()));
        if taken {
            return Ok(None);
        }
        let inserted = lead.clone().into_lead();
        tables.leads.push(inserted.clone());
        Ok(Some(inserted))
    }
}

#[async_trait]
impl ConversationSink for MemoryStore {
    async fn append(&self, message: &ConversationMessage) -> Result<LogOutcome, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        if let Some(external_id) = message.external_message_id.as_deref() {
            let duplicate = tables.messages.iter().any(|existing| {
                existing.channel == message.channel
                    && existing.external_message_id.as_deref() == Some(external_id)
            });
            if duplicate {
                return Ok(LogOutcome::Duplicate);
            }
        }
        tables.messages.push(message.clone());
        Ok(LogOutcome::Inserted)
    }
}
