// Periodic removal of deleted accounts from the moderated chat.

use super::actuator::{MemberDirectory, ModerationActuator};
use super::moderation_service::{ModerationService, ModerationStore};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Sweeps once per `member_sweep_interval`, first sweep one interval after
/// start. Stops when `shutdown` flips to `true` or its sender goes away.
pub async fn run_member_sweep_worker<S, P>(
    service: Arc<ModerationService<S>>,
    platform: Arc<P>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: ModerationStore + 'static,
    P: ModerationActuator + MemberDirectory + 'static,
{
    let period = service.policy().member_sweep_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(every_secs = period.as_secs(), "Member sweep worker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = service.sweep_deleted_accounts(platform.as_ref()).await {
                    tracing::error!("Deleted-account sweep failed: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Member sweep worker stopped");
}
