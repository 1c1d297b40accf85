// Salt rotation scheduler.
//
// The swap itself lives in `ModerationService::rotate_now`; this module owns
// the schedule math and the background worker that drives it.

use super::moderation_models::{KeyMode, RotationState};
use super::moderation_service::{ModerationService, ModerationStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationReport {
    pub rotated_at: DateTime<Utc>,
    pub cleared_records: u64,
}

/// Rotating mode only: due once more than `interval` has passed since the last
/// rotation, or if there never was one.
pub fn is_due(state: &RotationState, now: DateTime<Utc>, interval: Duration) -> bool {
    if state.mode == KeyMode::Fixed {
        return false;
    }
    match state.last_rotated_at {
        None => true,
        Some(last) => now
            .signed_duration_since(last)
            .to_std()
            .map(|elapsed| elapsed > interval)
            .unwrap_or(false),
    }
}

pub fn next_rotation_at(state: &RotationState, interval: Duration) -> Option<DateTime<Utc>> {
    if state.mode == KeyMode::Fixed {
        return None;
    }
    let interval = chrono::Duration::from_std(interval).ok()?;
    state.last_rotated_at.map(|last| last + interval)
}

/// Periodic worker. Ticks on the policy's check cadence until `shutdown`
/// flips to `true` or its sender goes away.
pub async fn run_rotation_worker<S>(
    service: Arc<ModerationService<S>>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: ModerationStore + 'static,
{
    let mut ticker = tokio::time::interval(service.policy().rotation_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        key_mode = %service.key_mode(),
        "Rotation worker started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.run_maintenance(Utc::now()).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Rotation worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_config::{ModerationConfig, ModerationPolicy};
    use crate::infra::moderation::InMemoryModerationStore;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn rotating(last: Option<DateTime<Utc>>) -> RotationState {
        RotationState {
            mode: KeyMode::Rotating,
            last_rotated_at: last,
        }
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        assert!(is_due(&rotating(None), now, DAY));
        assert!(!is_due(&rotating(Some(now - chrono::Duration::hours(24))), now, DAY));
        assert!(is_due(
            &rotating(Some(now - chrono::Duration::hours(24) - chrono::Duration::seconds(1))),
            now,
            DAY
        ));
        // Clock went backwards.
        assert!(!is_due(&rotating(Some(now + chrono::Duration::hours(1))), now, DAY));
    }

    #[test]
    fn test_fixed_mode_never_due() {
        let state = RotationState {
            mode: KeyMode::Fixed,
            last_rotated_at: None,
        };
        assert!(!is_due(&state, Utc::now(), DAY));
        assert!(next_rotation_at(&state, DAY).is_none());
    }

    #[test]
    fn test_next_rotation_at() {
        let last = Utc::now();
        assert_eq!(
            next_rotation_at(&rotating(Some(last)), DAY),
            Some(last + chrono::Duration::hours(24))
        );
        assert!(next_rotation_at(&rotating(None), DAY).is_none());
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let config = ModerationConfig {
            target_chat_id: 1,
            admin_ids: [2].into_iter().collect(),
            fixed_key: None,
            seed_banned_words: String::new(),
            database_path: ":memory:".into(),
            policy: ModerationPolicy::default(),
        };
        let service = Arc::new(
            ModerationService::new(InMemoryModerationStore::new(), config)
                .await
                .unwrap(),
        );

        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(run_rotation_worker(service, rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
