use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{PipelineError, StoreError},
    platform::PlatformClient,
    store::LeadStore,
    types::{Channel, Lead, NewLead, Profile},
};

#[derive(Debug, Clone)]
pub struct ResolvedLead {
    pub lead: Lead,
    /// True only for the caller whose insert created the row.
    pub created: bool,
}

/// Maps an external chat identity to its Lead, creating one on first contact.
///
/// Concurrent first messages from the same identity race on the identity
/// column's unique constraint; the loser re-reads and returns the winner's
/// row, so every caller ends up with the same Lead.
pub async fn resolve_lead(
    leads: &dyn LeadStore,
    platform: &dyn PlatformClient,
    channel: Channel,
    external_user_id: &str,
) -> Result<ResolvedLead, PipelineError> {
    let field = channel.identity_field();
    let persistence = |source: StoreError| PipelineError::Persistence {
        channel,
        external_user_id: external_user_id.to_string(),
        source,
    };

    if let Some(lead) = leads
        .find_by_identity(field, external_user_id)
        .await
        .map_err(persistence)?
    {
        return Ok(ResolvedLead {
            lead,
            created: false,
        });
    }

    let profile = match platform.fetch_profile(channel, external_user_id).await {
        Ok(profile) => Some(profile),
        Err(err) => {
            warn!(
                %channel,
                external_user_id,
                error = %err,
                "profile lookup failed; creating lead with placeholder name"
            );
            None
        }
    };
    let new_lead = new_lead(channel, external_user_id, profile.as_ref());

    if let Some(lead) = leads
        .insert_if_absent(&new_lead)
        .await
        .map_err(persistence)?
    {
        info!(%channel, external_user_id, lead_id = %lead.id, "created lead");
        return Ok(ResolvedLead {
            lead,
            created: true,
        });
    }

    let winner = leads
        .find_by_identity(field, external_user_id)
        .await
        .map_err(persistence)?;
    match winner {
        Some(lead) => {
            info!(
                %channel,
                external_user_id,
                lead_id = %lead.id,
                "lost lead creation race; reusing winner"
            );
            Ok(ResolvedLead {
                lead,
                created: false,
            })
        }
        None => Err(persistence(StoreError::ConflictWinnerMissing {
            field,
            external_id: external_user_id.to_string(),
        })),
    }
}

fn placeholder_name(channel: Channel) -> String {
    format!("{} user", channel.label())
}

fn new_lead(channel: Channel, external_user_id: &str, profile: Option<&Profile>) -> NewLead {
    let note = match profile {
        Some(profile) => format!(
            "Captured from {} profile on first contact: {}",
            channel.label(),
            profile.raw
        ),
        None => format!(
            "{} profile unavailable on first contact",
            channel.label()
        ),
    };
    NewLead {
        id: Uuid::new_v4().to_string(),
        display_name: profile
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| placeholder_name(channel)),
        avatar_url: profile.and_then(|p| p.avatar_url.clone()),
        channel,
        external_user_id: external_user_id.to_string(),
        note,
        created_at: Utc::now().to_rfc3339(),
    }
}
