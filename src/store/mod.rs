//! Persistence seams for the webhook pipeline.
//!
//! Correctness under concurrent deliveries rests on the unique constraints
//! these stores enforce, not on in-process locking: one Lead per external
//! identity per channel, one message per `(channel, external_message_id)`.

mod memory;
mod postgres;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::{
    error::StoreError,
    types::{ConversationMessage, IdentityField, Lead, LogOutcome, NewLead},
};

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_by_identity(
        &self,
        field: IdentityField,
        external_id: &str,
    ) -> Result<Option<Lead>, StoreError>;

    /// Inserts the lead unless another row already holds its identity.
    /// `Ok(None)` means a concurrent writer won; the caller re-reads.
    async fn insert_if_absent(&self, lead: &NewLead) -> Result<Option<Lead>, StoreError>;
}

/// Append-only conversation log. Never read by the pipeline.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    async fn append(&self, message: &ConversationMessage) -> Result<LogOutcome, StoreError>;
}
