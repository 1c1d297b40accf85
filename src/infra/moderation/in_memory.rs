// In-memory implementation of ModerationStore, used by the core tests.
//
// DashMap's entry API gives the per-token atomic read-modify-write the trait
// asks for. Clones share the same underlying maps, which lets a test "restart"
// the service on top of the same data.

use crate::core::moderation::{
    ActivationState, CounterTotals, DmSpamRecord, IdentityToken, ModerationError,
    ModerationStore, ViolationRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Default)]
struct Tables {
    violations: DashMap<IdentityToken, ViolationRecord>,
    dm_spam: DashMap<IdentityToken, DmSpamRecord>,
    banned_words: DashSet<String>,
    activation: RwLock<ActivationState>,
    last_rotated_at: RwLock<Option<DateTime<Utc>>>,
    failing: AtomicBool,
}

#[derive(Clone, Default)]
pub struct InMemoryModerationStore {
    tables: Arc<Tables>,
}

fn expired(window_start: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now.signed_duration_since(window_start)
        .to_std()
        .map(|elapsed| elapsed > window)
        .unwrap_or(false)
}

fn poisoned<T>(_: T) -> ModerationError {
    ModerationError::Storage("lock poisoned".into())
}

impl InMemoryModerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a storage error until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.tables.failing.store(failing, Ordering::SeqCst);
    }

    pub fn violation_rows(&self) -> usize {
        self.tables.violations.len()
    }

    fn check(&self) -> Result<(), ModerationError> {
        if self.tables.failing.load(Ordering::SeqCst) {
            Err(ModerationError::Storage("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ModerationStore for InMemoryModerationStore {
    async fn record_violation(
        &self,
        token: &IdentityToken,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<ViolationRecord, ModerationError> {
        self.check()?;
        let mut entry = self
            .tables
            .violations
            .entry(*token)
            .or_insert(ViolationRecord {
                count: 0,
                window_start: now,
            });
        if entry.count == 0 || expired(entry.window_start, now, window) {
            entry.count = 1;
            entry.window_start = now;
        } else {
            entry.count = entry.count.saturating_add(1);
        }
        Ok(entry.clone())
    }

    async fn record_dm(
        &self,
        token: &IdentityToken,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<DmSpamRecord, ModerationError> {
        self.check()?;
        let mut entry = self.tables.dm_spam.entry(*token).or_insert(DmSpamRecord {
            count: 0,
            window_start: now,
            actioned: false,
        });
        if entry.count == 0 || expired(entry.window_start, now, window) {
            entry.count = 1;
            entry.window_start = now;
            entry.actioned = false;
        } else {
            entry.count = entry.count.saturating_add(1);
        }
        Ok(entry.clone())
    }

    async fn mark_dm_actioned(&self, token: &IdentityToken) -> Result<(), ModerationError> {
        self.check()?;
        if let Some(mut record) = self.tables.dm_spam.get_mut(token) {
            record.actioned = true;
        }
        Ok(())
    }

    async fn clear_counters(&self, rotated_at: DateTime<Utc>) -> Result<u64, ModerationError> {
        self.check()?;
        let mut last = self.tables.last_rotated_at.write().map_err(poisoned)?;
        let cleared = self.tables.violations.len() + self.tables.dm_spam.len();
        self.tables.violations.clear();
        self.tables.dm_spam.clear();
        *last = Some(rotated_at);
        Ok(cleared as u64)
    }

    async fn prune_expired(
        &self,
        now: DateTime<Utc>,
        violation_window: Duration,
        dm_window: Duration,
    ) -> Result<u64, ModerationError> {
        self.check()?;
        let before = self.tables.violations.len() + self.tables.dm_spam.len();
        self.tables
            .violations
            .retain(|_, r| !expired(r.window_start, now, violation_window));
        self.tables
            .dm_spam
            .retain(|_, r| !expired(r.window_start, now, dm_window));
        let after = self.tables.violations.len() + self.tables.dm_spam.len();
        Ok(before.saturating_sub(after) as u64)
    }

    async fn counter_totals(
        &self,
        now: DateTime<Utc>,
        violation_window: Duration,
        dm_window: Duration,
    ) -> Result<CounterTotals, ModerationError> {
        self.check()?;
        let mut totals = CounterTotals::default();
        for record in self.tables.violations.iter() {
            if !expired(record.window_start, now, violation_window) {
                totals.violations_in_window += u64::from(record.count);
            }
        }
        for record in self.tables.dm_spam.iter() {
            if !expired(record.window_start, now, dm_window) {
                totals.dm_messages_in_window += u64::from(record.count);
                if record.actioned {
                    totals.dm_actioned += 1;
                }
            }
        }
        Ok(totals)
    }

    async fn last_rotated_at(&self) -> Result<Option<DateTime<Utc>>, ModerationError> {
        self.check()?;
        Ok(*self.tables.last_rotated_at.read().map_err(poisoned)?)
    }

    async fn add_banned_words(
        &self,
        terms: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ModerationError> {
        self.check()?;
        Ok(terms
            .iter()
            .filter(|term| self.tables.banned_words.insert((*term).clone()))
            .cloned()
            .collect())
    }

    async fn remove_banned_words(
        &self,
        terms: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ModerationError> {
        self.check()?;
        Ok(terms
            .iter()
            .filter(|term| self.tables.banned_words.remove(*term).is_some())
            .cloned()
            .collect())
    }

    async fn banned_words(&self) -> Result<Vec<String>, ModerationError> {
        self.check()?;
        Ok(self.tables.banned_words.iter().map(|t| t.clone()).collect())
    }

    async fn activation_state(&self) -> Result<ActivationState, ModerationError> {
        self.check()?;
        Ok(*self.tables.activation.read().map_err(poisoned)?)
    }

    async fn activate(&self, now: DateTime<Utc>) -> Result<bool, ModerationError> {
        self.check()?;
        let mut state = self.tables.activation.write().map_err(poisoned)?;
        if state.is_active() {
            return Ok(false);
        }
        state.activated_at = Some(now);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(byte: u8) -> IdentityToken {
        IdentityToken::from_bytes([byte; 32])
    }

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    #[tokio::test]
    async fn test_violation_window_reset() {
        let store = InMemoryModerationStore::new();
        let t = Utc::now();

        assert_eq!(store.record_violation(&token(1), t, WEEK).await.unwrap().count, 1);
        assert_eq!(store.record_violation(&token(1), t, WEEK).await.unwrap().count, 2);

        let later = t + chrono::Duration::days(8);
        let record = store.record_violation(&token(1), later, WEEK).await.unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, later);
    }

    #[tokio::test]
    async fn test_dm_reset_clears_actioned() {
        let store = InMemoryModerationStore::new();
        let t = Utc::now();
        store.record_dm(&token(2), t, WEEK).await.unwrap();
        store.mark_dm_actioned(&token(2)).await.unwrap();

        let record = store
            .record_dm(&token(2), t + chrono::Duration::days(8), WEEK)
            .await
            .unwrap();
        assert_eq!(record.count, 1);
        assert!(!record.actioned);
    }

    #[tokio::test]
    async fn test_clear_counters() {
        let store = InMemoryModerationStore::new();
        let t = Utc::now();
        store.record_violation(&token(1), t, WEEK).await.unwrap();
        store.record_dm(&token(1), t, WEEK).await.unwrap();
        store.record_dm(&token(2), t, WEEK).await.unwrap();

        assert_eq!(store.clear_counters(t).await.unwrap(), 3);
        assert_eq!(store.last_rotated_at().await.unwrap(), Some(t));
        assert_eq!(store.counter_totals(t, WEEK, WEEK).await.unwrap(), CounterTotals::default());
    }

    #[tokio::test]
    async fn test_banned_words_insert_or_ignore() {
        let store = InMemoryModerationStore::new();
        let terms: BTreeSet<String> = ["spam".to_string()].into_iter().collect();
        assert_eq!(store.add_banned_words(&terms).await.unwrap(), terms);
        assert!(store.add_banned_words(&terms).await.unwrap().is_empty());
        assert_eq!(store.remove_banned_words(&terms).await.unwrap(), terms);
        assert!(store.banned_words().await.unwrap().is_empty());
    }
}
