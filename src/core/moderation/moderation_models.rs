// Moderation domain models - data structures for the decision engine.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts events into `ChatEvent` and executes
// the `ModerationAction`s the core hands back.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

// ============================================================================
// IDENTITY
// ============================================================================

/// Opaque keyed-hash output standing in for a raw user id.
///
/// This is the only join key into the counter stores. Raw ids are never
/// persisted.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityToken([u8; 32]);

impl IdentityToken {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[cfg(test)]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex chars, the only form that ever reaches the logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

// Keep the full token out of Debug output so it can't leak through `{:?}`.
impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityToken({}…)", self.short())
    }
}

/// Whether the anonymization key was supplied by the operator or is generated
/// and replaced on a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Fixed,
    Rotating,
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Fixed => write!(f, "fixed"),
            KeyMode::Rotating => write!(f, "rotating"),
        }
    }
}

// ============================================================================
// COUNTER RECORDS
// ============================================================================

/// Rolling-window violation counter for one identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationRecord {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

/// Rolling-window direct-message counter for one identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmSpamRecord {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    /// Set once ban + block went through for the current window.
    pub actioned: bool,
}

/// Persisted activation switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivationState {
    pub activated_at: Option<DateTime<Utc>>,
}

impl ActivationState {
    pub fn is_active(&self) -> bool {
        self.activated_at.is_some()
    }
}

/// Key mode plus the last time dependent state was wiped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationState {
    pub mode: KeyMode,
    pub last_rotated_at: Option<DateTime<Utc>>,
}

/// Aggregate counter totals, used by the status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterTotals {
    /// Sum of violation counts whose window is still open.
    pub violations_in_window: u64,
    /// Sum of DM counts whose window is still open.
    pub dm_messages_in_window: u64,
    /// Identities banned and blocked for DM volume in the current window.
    pub dm_actioned: u64,
}

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    New,
    Edit,
    Forward,
    Join,
    DirectMessage,
}

/// Where a message lives, so the actuator can delete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// A platform-neutral chat event.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub kind: EventKind,
    /// Chat scope. `None` for direct messages, which are not chat-scoped.
    pub chat_id: Option<u64>,
    pub sender_id: u64,
    pub message: Option<MessageRef>,
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// DECISIONS
// ============================================================================

/// Penalty state of one identity within its violation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyState {
    Clean,
    Warned,
    Escalated,
}

/// A command for the external actuator.
///
/// Raw user ids appear here because the actuator has to address the real
/// account; actions are never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationAction {
    DeleteMessage(MessageRef),
    Mute {
        chat_id: u64,
        user_id: u64,
        duration: Duration,
    },
    Ban {
        chat_id: u64,
        user_id: u64,
    },
    Block {
        user_id: u64,
    },
    /// Remove from the chat without a ban; the user may rejoin.
    Kick {
        chat_id: u64,
        user_id: u64,
    },
    SendEphemeral {
        channel_id: u64,
        text: String,
        ttl: Duration,
    },
}

impl ModerationAction {
    pub fn label(&self) -> &'static str {
        match self {
            ModerationAction::DeleteMessage(_) => "delete",
            ModerationAction::Mute { .. } => "mute",
            ModerationAction::Ban { .. } => "ban",
            ModerationAction::Block { .. } => "block",
            ModerationAction::Kick { .. } => "kick",
            ModerationAction::SendEphemeral { .. } => "ephemeral",
        }
    }
}

/// Follow-up bookkeeping that depends on the actuator succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    MarkDmActioned(IdentityToken),
}

/// What the core decided for one event.
#[derive(Debug, Clone, Default)]
pub struct EventOutcome {
    pub actions: Vec<ModerationAction>,
    /// Reply to send back over the DM channel (administrators only).
    pub reply: Option<String>,
    pub follow_up: Option<FollowUp>,
}

impl EventOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn actions(actions: Vec<ModerationAction>) -> Self {
        Self {
            actions,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.reply.is_none()
    }
}

/// Aggregate-only status. Carries no identity tokens or raw ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub activated_at: Option<DateTime<Utc>>,
    pub banned_word_count: usize,
    pub violations_in_window: u64,
    pub dm_messages_in_window: u64,
    pub dm_actioned: u64,
    pub key_mode: KeyMode,
    pub next_rotation_at: Option<DateTime<Utc>>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.activated_at {
            Some(at) => writeln!(f, "Active since: {}", at.format("%Y-%m-%d %H:%M UTC"))?,
            None => writeln!(f, "Active since: not activated")?,
        }
        writeln!(f, "Banned words: {}", self.banned_word_count)?;
        writeln!(f, "Violations (current window): {}", self.violations_in_window)?;
        writeln!(
            f,
            "DM spam: {} messages, {} actioned",
            self.dm_messages_in_window, self.dm_actioned
        )?;
        write!(f, "Key mode: {}", self.key_mode)?;
        if let Some(next) = self.next_rotation_at {
            write!(f, "\nNext rotation: {}", next.format("%Y-%m-%d %H:%M UTC"))?;
        }
        Ok(())
    }
}
