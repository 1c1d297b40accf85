// Violation tracker - the penalty state machine.
//
//   CLEAN --violation--> WARNED --violation in window--> ESCALATED
//
// A violation after the window has expired starts over at WARNED.

use super::moderation_config::ModerationPolicy;
use super::moderation_models::{ChatEvent, IdentityToken, ModerationAction, PenaltyState};
use super::moderation_service::{ModerationError, ModerationStore};
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const WARNING_TEXT: &str = "⚠️ A message was removed for containing banned content. \
You have been muted for 12 hours. Another violation within 7 days results in a permanent ban.";

pub struct ViolationTracker {
    window: Duration,
    mute_duration: Duration,
    warning_ttl: Duration,
}

impl ViolationTracker {
    pub fn new(policy: &ModerationPolicy) -> Self {
        Self {
            window: policy.violation_window,
            mute_duration: policy.mute_duration,
            warning_ttl: policy.warning_ttl,
        }
    }

    /// Count a violation for `token` and return the resulting state.
    pub async fn record<S>(
        &self,
        store: &S,
        token: &IdentityToken,
        now: DateTime<Utc>,
    ) -> Result<PenaltyState, ModerationError>
    where
        S: ModerationStore + ?Sized,
    {
        let record = store.record_violation(token, now, self.window).await?;
        Ok(Self::state_for(record.count))
    }

    pub fn state_for(count: u32) -> PenaltyState {
        match count {
            0 => PenaltyState::Clean,
            1 => PenaltyState::Warned,
            _ => PenaltyState::Escalated,
        }
    }

    /// Actuator commands for a state. The delete always comes first.
    pub fn penalty_actions(
        &self,
        state: PenaltyState,
        chat_id: u64,
        event: &ChatEvent,
    ) -> Vec<ModerationAction> {
        let mut actions = Vec::new();
        if state == PenaltyState::Clean {
            return actions;
        }

        if let Some(message) = event.message {
            actions.push(ModerationAction::DeleteMessage(message));
        }

        match state {
            PenaltyState::Clean => {}
            PenaltyState::Warned => {
                actions.push(ModerationAction::Mute {
                    chat_id,
                    user_id: event.sender_id,
                    duration: self.mute_duration,
                });
                if let Some(message) = event.message {
                    actions.push(ModerationAction::SendEphemeral {
                        channel_id: message.channel_id,
                        text: WARNING_TEXT.to_string(),
                        ttl: self.warning_ttl,
                    });
                }
            }
            PenaltyState::Escalated => {
                actions.push(ModerationAction::Ban {
                    chat_id,
                    user_id: event.sender_id,
                });
            }
        }

        actions
    }
}
