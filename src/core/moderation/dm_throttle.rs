// DM spam throttle - per-identity direct message volume limit.
//
// Same reset-on-expiry window as the violation tracker, different knobs.
// Breach fires when the count first goes past the threshold, so one window
// produces at most one ban + block.

use super::moderation_config::ModerationPolicy;
use super::moderation_models::{DmSpamRecord, IdentityToken, ModerationAction};
use super::moderation_service::{ModerationError, ModerationStore};
use chrono::{DateTime, Utc};
use std::time::Duration;

pub struct DmSpamThrottle {
    threshold: u32,
    window: Duration,
}

impl DmSpamThrottle {
    pub fn new(policy: &ModerationPolicy) -> Self {
        Self {
            threshold: policy.dm_threshold,
            window: policy.dm_window,
        }
    }

    /// Count one direct message. Returns `true` exactly when this message
    /// crossed the threshold.
    pub async fn record_dm<S>(
        &self,
        store: &S,
        token: &IdentityToken,
        now: DateTime<Utc>,
    ) -> Result<bool, ModerationError>
    where
        S: ModerationStore + ?Sized,
    {
        let record = store.record_dm(token, now, self.window).await?;
        Ok(self.is_breach(&record))
    }

    fn is_breach(&self, record: &DmSpamRecord) -> bool {
        record.count == self.threshold.saturating_add(1) && !record.actioned
    }

    /// Silent ban from the moderated chat plus a protocol-level block.
    pub fn breach_actions(&self, chat_id: u64, user_id: u64) -> Vec<ModerationAction> {
        vec![
            ModerationAction::Ban { chat_id, user_id },
            ModerationAction::Block { user_id },
        ]
    }
}
