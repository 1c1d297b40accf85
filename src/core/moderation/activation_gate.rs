// Activation gate - one-way INACTIVE -> ACTIVE switch.

use super::moderation_models::ActivationState;
use super::moderation_service::{ModerationError, ModerationStore};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationResult {
    Activated,
    AlreadyActive,
}

impl ActivationResult {
    pub fn message(&self) -> &'static str {
        match self {
            ActivationResult::Activated => "Activated.",
            ActivationResult::AlreadyActive => "Already active.",
        }
    }
}

/// Cached view of the persisted activation state.
pub struct ActivationGate {
    state: RwLock<ActivationState>,
}

impl ActivationGate {
    pub fn new(state: ActivationState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state.read().await.is_active()
    }

    pub async fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.activated_at
    }

    /// Persist first, then flip the cached flag. Repeated calls are no-ops.
    pub async fn activate<S>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<ActivationResult, ModerationError>
    where
        S: ModerationStore + ?Sized,
    {
        let mut state = self.state.write().await;
        if state.is_active() {
            return Ok(ActivationResult::AlreadyActive);
        }

        if store.activate(now).await? {
            state.activated_at = Some(now);
            Ok(ActivationResult::Activated)
        } else {
            // Someone else got there first; adopt the stored timestamp.
            *state = store.activation_state().await?;
            Ok(ActivationResult::AlreadyActive)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::moderation::InMemoryModerationStore;

    #[tokio::test]
    async fn test_activate_is_one_way_and_idempotent() {
        let store = InMemoryModerationStore::new();
        let gate = ActivationGate::new(ActivationState::default());
        assert!(!gate.is_active().await);

        let now = Utc::now();
        assert_eq!(
            gate.activate(&store, now).await.unwrap(),
            ActivationResult::Activated
        );
        assert_eq!(
            gate.activate(&store, now + chrono::Duration::minutes(5))
                .await
                .unwrap(),
            ActivationResult::AlreadyActive
        );
        assert_eq!(gate.activated_at().await, Some(now));
        assert_eq!(store.activation_state().await.unwrap().activated_at, Some(now));
    }

    #[tokio::test]
    async fn test_stale_cache_adopts_stored_state() {
        let store = InMemoryModerationStore::new();
        let earlier = Utc::now() - chrono::Duration::days(1);
        store.activate(earlier).await.unwrap();

        let gate = ActivationGate::new(ActivationState::default());
        assert_eq!(
            gate.activate(&store, Utc::now()).await.unwrap(),
            ActivationResult::AlreadyActive
        );
        assert_eq!(gate.activated_at().await, Some(earlier));
    }

    #[test]
    fn test_messages() {
        assert_eq!(ActivationResult::Activated.message(), "Activated.");
        assert_eq!(ActivationResult::AlreadyActive.message(), "Already active.");
    }
}
