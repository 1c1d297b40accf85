// Moderation service - core business logic for the decision engine.
//
// This service wires together:
// - Identity anonymization (keyed hash, rotating or fixed key)
// - Banned word detection
// - Violation tracking (warn -> permanent ban)
// - DM spam throttling
// - Key rotation with atomic counter wipe
// - The activation gate
//
// NO Discord dependencies here - just pure domain logic.

use super::activation_gate::{ActivationGate, ActivationResult};
use super::actuator::{execute_actions, ExecutionReport, MemberDirectory, ModerationActuator};
use super::admin_console::{self, AdminCommand};
use super::anonymizer::{AnonymizationKey, IdentityAnonymizer};
use super::banned_words::{normalize_terms, AddTermsOutcome, BannedWordMatcher, RemoveTermsOutcome};
use super::dm_throttle::DmSpamThrottle;
use super::moderation_config::{ModerationConfig, ModerationPolicy};
use super::moderation_models::{
    ActivationState, ChatEvent, CounterTotals, DmSpamRecord, EventKind, EventOutcome, FollowUp,
    IdentityToken, KeyMode, ModerationAction, RotationState, StatusSnapshot, ViolationRecord,
};
use super::salt_rotation::{self, RotationReport};
use super::violation_tracker::ViolationTracker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    /// Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transient. The triggering event is dropped, never retried.
    #[error("Storage error: {0}")]
    Storage(String),

    /// One actuator call failed or timed out.
    #[error("Actuator error: {0}")]
    Actuator(String),

    /// Bad administrator input. Nothing was changed.
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Transactional store behind the engine.
///
/// Each counter method is a single atomic read-modify-write per token, so two
/// concurrent first offenses can never both observe `count = 0`.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Reset the record if its window expired (or it does not exist), then
    /// increment. Returns the record after the update.
    async fn record_violation(
        &self,
        token: &IdentityToken,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<ViolationRecord, ModerationError>;

    /// Same shape as `record_violation`, for direct messages. A reset also
    /// clears the `actioned` flag.
    async fn record_dm(
        &self,
        token: &IdentityToken,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<DmSpamRecord, ModerationError>;

    /// Flag the DM record as banned + blocked. No-op if the record is gone.
    async fn mark_dm_actioned(&self, token: &IdentityToken) -> Result<(), ModerationError>;

    /// Delete every violation and DM record and set `last_rotated_at`, as one
    /// unit. Returns how many records were removed.
    async fn clear_counters(&self, rotated_at: DateTime<Utc>) -> Result<u64, ModerationError>;

    /// Drop records whose window has expired.
    async fn prune_expired(
        &self,
        now: DateTime<Utc>,
        violation_window: Duration,
        dm_window: Duration,
    ) -> Result<u64, ModerationError>;

    async fn counter_totals(
        &self,
        now: DateTime<Utc>,
        violation_window: Duration,
        dm_window: Duration,
    ) -> Result<CounterTotals, ModerationError>;

    async fn last_rotated_at(&self) -> Result<Option<DateTime<Utc>>, ModerationError>;

    /// Insert normalized terms, returning the ones that were new.
    async fn add_banned_words(
        &self,
        terms: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ModerationError>;

    /// Remove normalized terms, returning the ones that existed.
    async fn remove_banned_words(
        &self,
        terms: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ModerationError>;

    async fn banned_words(&self) -> Result<Vec<String>, ModerationError>;

    async fn activation_state(&self) -> Result<ActivationState, ModerationError>;

    /// One-way switch. Returns `true` if this call performed the transition.
    async fn activate(&self, now: DateTime<Utc>) -> Result<bool, ModerationError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// The moderation engine. One instance per process, shared behind an `Arc`.
///
/// Mutation contract: the key is only replaced by `rotate_now`, which holds the
/// exclusive key lease for the whole swap; counter writes happen only while a
/// shared lease is held. Activation goes through the gate's own lock.
pub struct ModerationService<S: ModerationStore> {
    store: S,
    target_chat_id: u64,
    admin_ids: HashSet<u64>,
    policy: ModerationPolicy,
    anonymizer: IdentityAnonymizer,
    matcher: BannedWordMatcher,
    gate: ActivationGate,
    tracker: ViolationTracker,
    throttle: DmSpamThrottle,
}

impl<S: ModerationStore> ModerationService<S> {
    /// Explicit initialization step: seed terms, load persisted state and, in
    /// rotating mode, start from a fresh key with empty counters.
    pub async fn new(store: S, config: ModerationConfig) -> Result<Self, ModerationError> {
        let anonymizer = match &config.fixed_key {
            Some(bytes) => IdentityAnonymizer::fixed(AnonymizationKey::from_bytes(bytes.clone())),
            None => IdentityAnonymizer::rotating(),
        };

        let seed = normalize_terms(&config.seed_banned_words);
        if !seed.is_empty() {
            let added = store.add_banned_words(&seed).await?;
            tracing::info!(seeded = added.len(), "Seeded banned words from configuration");
        }

        let matcher = BannedWordMatcher::new();
        matcher.replace_all(store.banned_words().await?).await;

        let gate = ActivationGate::new(store.activation_state().await?);

        let service = Self {
            tracker: ViolationTracker::new(&config.policy),
            throttle: DmSpamThrottle::new(&config.policy),
            store,
            target_chat_id: config.target_chat_id,
            admin_ids: config.admin_ids,
            policy: config.policy,
            anonymizer,
            matcher,
            gate,
        };

        if service.anonymizer.mode() == KeyMode::Rotating {
            // Tokens from a previous process can never be resolved again.
            service.rotate_now(Utc::now()).await?;
        }

        let active = service.gate.is_active().await;
        let banned_words = service.matcher.len().await;
        tracing::info!(
            key_mode = %service.anonymizer.mode(),
            active,
            banned_words,
            "Moderation service initialized"
        );

        Ok(service)
    }

    pub fn policy(&self) -> &ModerationPolicy {
        &self.policy
    }

    pub fn key_mode(&self) -> KeyMode {
        self.anonymizer.mode()
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    #[cfg(test)]
    pub async fn is_active(&self) -> bool {
        self.gate.is_active().await
    }

    /// Decide and execute. Returns the reply to send back to the sender, if any.
    pub async fn process<A>(
        &self,
        event: &ChatEvent,
        actuator: &A,
    ) -> Result<Option<String>, ModerationError>
    where
        A: ModerationActuator + ?Sized,
    {
        let outcome = self.handle_event(event).await?;
        if outcome.actions.is_empty() {
            return Ok(outcome.reply);
        }

        // No lock is held here: the actuator is the slow part.
        let report = execute_actions(actuator, &outcome.actions, self.policy.actuator_timeout).await;
        self.apply_follow_up(outcome.follow_up, &report).await;

        Ok(outcome.reply)
    }

    /// Pure decision step: what should happen for this event.
    pub async fn handle_event(&self, event: &ChatEvent) -> Result<EventOutcome, ModerationError> {
        if event.kind == EventKind::DirectMessage {
            return self.handle_direct_message(event).await;
        }

        if event.chat_id != Some(self.target_chat_id) {
            return Ok(EventOutcome::none());
        }

        if !self.gate.is_active().await {
            return Ok(EventOutcome::none());
        }

        match event.kind {
            EventKind::New | EventKind::Edit | EventKind::Forward => self.scan_message(event).await,
            EventKind::Join => self.screen_join(event).await,
            EventKind::DirectMessage => Ok(EventOutcome::none()),
        }
    }

    async fn scan_message(&self, event: &ChatEvent) -> Result<EventOutcome, ModerationError> {
        let text = match event.text.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Ok(EventOutcome::none()),
        };

        let hit = match self.matcher.contains_violation(text).await {
            Some(hit) => hit,
            None => return Ok(EventOutcome::none()),
        };

        let state = {
            let key = self.anonymizer.lease().await;
            let token = key.anonymize(event.sender_id);
            let state = self
                .tracker
                .record(&self.store, &token, event.timestamp)
                .await?;
            tracing::info!(
                token = %token.short(),
                rule = ?hit.rule,
                state = ?state,
                "Banned word detected"
            );
            state
        };

        Ok(EventOutcome::actions(self.tracker.penalty_actions(
            state,
            self.target_chat_id,
            event,
        )))
    }

    /// A joining member whose name carries a banned term is kicked. Nothing is
    /// counted.
    async fn screen_join(&self, event: &ChatEvent) -> Result<EventOutcome, ModerationError> {
        let name = event.text.as_deref().unwrap_or_default();
        let Some(hit) = self.matcher.contains_violation(name).await else {
            tracing::debug!("Member joined the moderated chat");
            return Ok(EventOutcome::none());
        };

        tracing::info!(rule = ?hit.rule, "Joining member screened out by name");
        Ok(EventOutcome::actions(vec![ModerationAction::Kick {
            chat_id: self.target_chat_id,
            user_id: event.sender_id,
        }]))
    }

    async fn handle_direct_message(
        &self,
        event: &ChatEvent,
    ) -> Result<EventOutcome, ModerationError> {
        if self.is_admin(event.sender_id) {
            let command = AdminCommand::parse(event.text.as_deref().unwrap_or_default());
            let reply = self.handle_admin_command(command, event.timestamp).await?;
            return Ok(EventOutcome::reply(reply));
        }

        // Non-administrators never get a reply, whatever happens.
        if !self.gate.is_active().await {
            return Ok(EventOutcome::none());
        }

        let (token, breached) = {
            let key = self.anonymizer.lease().await;
            let token = key.anonymize(event.sender_id);
            let breached = self
                .throttle
                .record_dm(&self.store, &token, event.timestamp)
                .await?;
            (token, breached)
        };

        if !breached {
            return Ok(EventOutcome::none());
        }

        tracing::warn!(token = %token.short(), "DM spam threshold breached");
        Ok(EventOutcome {
            actions: self
                .throttle
                .breach_actions(self.target_chat_id, event.sender_id),
            reply: None,
            follow_up: Some(FollowUp::MarkDmActioned(token)),
        })
    }

    async fn apply_follow_up(&self, follow_up: Option<FollowUp>, report: &ExecutionReport) {
        let Some(FollowUp::MarkDmActioned(token)) = follow_up else {
            return;
        };
        if !report.all_succeeded() {
            tracing::warn!(
                token = %token.short(),
                failed = report.failed,
                "DM spam actions incomplete, not counted as actioned"
            );
            return;
        }
        let _key = self.anonymizer.lease().await;
        if let Err(e) = self.store.mark_dm_actioned(&token).await {
            tracing::error!("Failed to mark DM spam record as actioned: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Administrative operations
    // ------------------------------------------------------------------------

    pub async fn handle_admin_command(
        &self,
        command: AdminCommand,
        now: DateTime<Utc>,
    ) -> Result<String, ModerationError> {
        match command {
            AdminCommand::Activate => Ok(self.activate(now).await?.message().to_string()),
            AdminCommand::AddWords(raw) => match self.add_banned_words(&raw).await {
                Ok(outcome) => Ok(admin_console::format_added(&outcome)),
                Err(ModerationError::Validation(_)) => Ok(admin_console::NO_VALID_WORDS.into()),
                Err(e) => Err(e),
            },
            AdminCommand::RemoveWords(raw) => match self.remove_banned_words(&raw).await {
                Ok(outcome) => Ok(admin_console::format_removed(&outcome)),
                Err(ModerationError::Validation(_)) => Ok(admin_console::NO_VALID_WORDS.into()),
                Err(e) => Err(e),
            },
            AdminCommand::Status => Ok(self.status(now).await?.to_string()),
            AdminCommand::Help => Ok(admin_console::help_text(&self.policy)),
        }
    }

    pub async fn activate(&self, now: DateTime<Utc>) -> Result<ActivationResult, ModerationError> {
        let result = self.gate.activate(&self.store, now).await?;
        if result == ActivationResult::Activated {
            tracing::info!("Moderation activated");
        }
        Ok(result)
    }

    pub async fn add_banned_words(&self, raw: &str) -> Result<AddTermsOutcome, ModerationError> {
        let terms = normalize_terms(raw);
        if terms.is_empty() {
            return Err(ModerationError::Validation("no valid words provided".into()));
        }

        let added = self.store.add_banned_words(&terms).await?;
        self.matcher.insert_cached(&added).await;

        let skipped = terms.difference(&added).cloned().collect();
        tracing::info!(added = added.len(), "Banned words updated");
        Ok(AddTermsOutcome { added, skipped })
    }

    pub async fn remove_banned_words(
        &self,
        raw: &str,
    ) -> Result<RemoveTermsOutcome, ModerationError> {
        let terms = normalize_terms(raw);
        if terms.is_empty() {
            return Err(ModerationError::Validation("no valid words provided".into()));
        }

        let removed = self.store.remove_banned_words(&terms).await?;
        self.matcher.remove_cached(&removed).await;

        let not_found = terms.difference(&removed).cloned().collect();
        tracing::info!(removed = removed.len(), "Banned words removed");
        Ok(RemoveTermsOutcome { removed, not_found })
    }

    /// Aggregate-only snapshot for administrators.
    pub async fn status(&self, now: DateTime<Utc>) -> Result<StatusSnapshot, ModerationError> {
        let totals = self
            .store
            .counter_totals(now, self.policy.violation_window, self.policy.dm_window)
            .await?;
        let rotation = self.rotation_state().await?;

        Ok(StatusSnapshot {
            activated_at: self.gate.activated_at().await,
            banned_word_count: self.matcher.len().await,
            violations_in_window: totals.violations_in_window,
            dm_messages_in_window: totals.dm_messages_in_window,
            dm_actioned: totals.dm_actioned,
            key_mode: rotation.mode,
            next_rotation_at: salt_rotation::next_rotation_at(
                &rotation,
                self.policy.rotation_interval,
            ),
        })
    }

    // ------------------------------------------------------------------------
    // Rotation & maintenance
    // ------------------------------------------------------------------------

    pub async fn rotation_state(&self) -> Result<RotationState, ModerationError> {
        Ok(RotationState {
            mode: self.anonymizer.mode(),
            last_rotated_at: self.store.last_rotated_at().await?,
        })
    }

    /// Rotate if in rotating mode and the interval has elapsed.
    pub async fn rotate_if_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<RotationReport>, ModerationError> {
        let state = self.rotation_state().await?;
        if !salt_rotation::is_due(&state, now, self.policy.rotation_interval) {
            return Ok(None);
        }
        self.rotate_now(now).await.map(Some)
    }

    /// Replace the key and wipe both counter stores as one unit.
    ///
    /// The exclusive lease makes every event that needs a token wait until the
    /// swap is done. If the wipe fails the old key stays in place.
    pub async fn rotate_now(&self, now: DateTime<Utc>) -> Result<RotationReport, ModerationError> {
        if self.anonymizer.mode() == KeyMode::Fixed {
            return Err(ModerationError::Config(
                "a fixed anonymization key never rotates".into(),
            ));
        }

        let mut key = self.anonymizer.lease_exclusive().await;
        let fresh = AnonymizationKey::generate();
        let cleared_records = self.store.clear_counters(now).await?;
        *key = fresh;
        drop(key);

        tracing::info!(cleared_records, "Anonymization key rotated");
        Ok(RotationReport {
            rotated_at: now,
            cleared_records,
        })
    }

    /// Kick every deleted account out of the moderated chat. Skipped while
    /// inactive; a failed kick is left for the next sweep.
    pub async fn sweep_deleted_accounts<P>(
        &self,
        platform: &P,
    ) -> Result<ExecutionReport, ModerationError>
    where
        P: ModerationActuator + MemberDirectory + ?Sized,
    {
        if !self.gate.is_active().await {
            return Ok(ExecutionReport::default());
        }

        let actions: Vec<ModerationAction> = platform
            .deleted_members(self.target_chat_id)
            .await?
            .into_iter()
            .map(|user_id| ModerationAction::Kick {
                chat_id: self.target_chat_id,
                user_id,
            })
            .collect();
        if actions.is_empty() {
            return Ok(ExecutionReport::default());
        }

        let report = execute_actions(platform, &actions, self.policy.actuator_timeout).await;
        tracing::info!(
            removed = report.attempted - report.failed,
            failed = report.failed,
            "Swept deleted accounts"
        );
        Ok(report)
    }

    /// Periodic work: rotation check plus pruning of expired records.
    pub async fn run_maintenance(&self, now: DateTime<Utc>) {
        if !self.gate.is_active().await {
            tracing::debug!("Moderation inactive, skipping maintenance");
            return;
        }

        if let Err(e) = self.rotate_if_due(now).await {
            tracing::error!("Key rotation failed: {}", e);
        }

        match self
            .store
            .prune_expired(now, self.policy.violation_window, self.policy.dm_window)
            .await
        {
            Ok(0) => {}
            Ok(pruned) => tracing::info!(pruned, "Pruned expired moderation records"),
            Err(e) => tracing::error!("Failed to prune expired records: {}", e),
        }
    }
}
