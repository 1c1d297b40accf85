// Moderation actuator port and the executor that drives it.
//
// Every call is attempted once, bounded by a timeout. Failures are logged and
// counted, never retried.

use super::moderation_models::{MessageRef, ModerationAction};
use super::moderation_service::ModerationError;
use async_trait::async_trait;
use std::time::Duration;

/// The platform side: whatever can delete, mute, ban, block and post.
#[async_trait]
pub trait ModerationActuator: Send + Sync {
    async fn delete_message(&self, message: MessageRef) -> Result<(), ModerationError>;

    async fn mute_user(
        &self,
        chat_id: u64,
        user_id: u64,
        duration: Duration,
    ) -> Result<(), ModerationError>;

    async fn ban_user(&self, chat_id: u64, user_id: u64) -> Result<(), ModerationError>;

    async fn block_user(&self, user_id: u64) -> Result<(), ModerationError>;

    async fn kick_user(&self, chat_id: u64, user_id: u64) -> Result<(), ModerationError>;

    /// Post a message that removes itself after `ttl`.
    async fn send_ephemeral(
        &self,
        channel_id: u64,
        text: &str,
        ttl: Duration,
    ) -> Result<(), ModerationError>;
}

/// Read side of the platform: who in the chat is a deleted account.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn deleted_members(&self, chat_id: u64) -> Result<Vec<u64>, ModerationError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub attempted: usize,
    pub failed: usize,
}

impl ExecutionReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

async fn dispatch<A>(actuator: &A, action: &ModerationAction) -> Result<(), ModerationError>
where
    A: ModerationActuator + ?Sized,
{
    match action {
        ModerationAction::DeleteMessage(message) => actuator.delete_message(*message).await,
        ModerationAction::Mute {
            chat_id,
            user_id,
            duration,
        } => actuator.mute_user(*chat_id, *user_id, *duration).await,
        ModerationAction::Ban { chat_id, user_id } => actuator.ban_user(*chat_id, *user_id).await,
        ModerationAction::Block { user_id } => actuator.block_user(*user_id).await,
        ModerationAction::Kick { chat_id, user_id } => {
            actuator.kick_user(*chat_id, *user_id).await
        }
        ModerationAction::SendEphemeral {
            channel_id,
            text,
            ttl,
        } => actuator.send_ephemeral(*channel_id, text, *ttl).await,
    }
}

/// Run actions in order. A failure does not stop the ones after it.
pub async fn execute_actions<A>(
    actuator: &A,
    actions: &[ModerationAction],
    timeout: Duration,
) -> ExecutionReport
where
    A: ModerationActuator + ?Sized,
{
    let mut report = ExecutionReport::default();

    for action in actions {
        report.attempted += 1;
        let result = match tokio::time::timeout(timeout, dispatch(actuator, action)).await {
            Ok(result) => result,
            Err(_) => Err(ModerationError::Actuator(format!(
                "{} timed out after {:?}",
                action.label(),
                timeout
            ))),
        };

        if let Err(e) = result {
            report.failed += 1;
            tracing::warn!(action = action.label(), "Moderation action failed: {}", e);
        }
    }

    report
}
