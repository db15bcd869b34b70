//! Staff-facing notifications. Kept apart from the conversation log so a
//! failed or slow notification never affects what gets persisted.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    platform::PlatformClient,
    reply::OutboundMessage,
    templates::{render_new_lead_notice, NewLeadNotice},
    types::{Channel, Lead, ReplyTarget},
};

#[async_trait]
pub trait AuditNotifier: Send + Sync {
    /// Best effort; implementations log their own failures.
    async fn lead_created(&self, lead: &Lead, first_message: &str);
}

/// Pushes a short notice about every new lead to the configured LINE admin.
pub struct LineAdminNotifier {
    platform: Arc<dyn PlatformClient>,
    admin_user_id: String,
}

impl LineAdminNotifier {
    pub fn new(platform: Arc<dyn PlatformClient>, admin_user_id: impl Into<String>) -> Self {
        Self {
            platform,
            admin_user_id: admin_user_id.into(),
        }
    }
}

#[async_trait]
impl AuditNotifier for LineAdminNotifier {
    async fn lead_created(&self, lead: &Lead, first_message: &str) {
        let channel = Channel::parse(&lead.source)
            .map(Channel::label)
            .unwrap_or(lead.source.as_str());
        let text = render_new_lead_notice(&NewLeadNotice {
            channel,
            name: &lead.display_name,
            lead_id: &lead.id,
            first_message,
        });
        let target = ReplyTarget::LinePush {
            to: self.admin_user_id.clone(),
        };
        match self
            .platform
            .send(&target, &OutboundMessage::Text(text))
            .await
        {
            Ok(_) => debug!(lead_id = %lead.id, "admin notified of new lead"),
            Err(err) => warn!(lead_id = %lead.id, error = %err, "admin notification failed"),
        }
    }
}
