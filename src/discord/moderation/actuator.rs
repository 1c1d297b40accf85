// Serenity implementation of the moderation actuator.
//
// Discord has no bot-side "block", so blocking closes the DM channel with the
// user. The ban that always accompanies it is what actually stops them.

use crate::core::moderation::{MemberDirectory, MessageRef, ModerationActuator, ModerationError};
use async_trait::async_trait;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

pub struct SerenityActuator {
    http: Arc<serenity::Http>,
}

impl SerenityActuator {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

fn actuator_err(e: serenity::Error) -> ModerationError {
    ModerationError::Actuator(e.to_string())
}

// Discord's maximum page size for the member list endpoint.
const MEMBER_PAGE: u64 = 1000;

/// Discord renames deleted accounts to `deleted_user_<hash>` (pomelo names)
/// or `Deleted User <hash>` (legacy names).
fn is_deleted_account(user: &serenity::User) -> bool {
    user.name.starts_with("deleted_user_") || user.name.starts_with("Deleted User")
}

#[async_trait]
impl ModerationActuator for SerenityActuator {
    async fn delete_message(&self, message: MessageRef) -> Result<(), ModerationError> {
        serenity::ChannelId::new(message.channel_id)
            .delete_message(&self.http, serenity::MessageId::new(message.message_id))
            .await
            .map_err(actuator_err)
    }

    async fn mute_user(
        &self,
        chat_id: u64,
        user_id: u64,
        duration: Duration,
    ) -> Result<(), ModerationError> {
        let secs = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX);
        let until = serenity::Timestamp::from_unix_timestamp(
            Utc::now().timestamp().saturating_add(secs),
        )
        .map_err(|e| ModerationError::Actuator(format!("bad mute deadline: {}", e)))?;

        serenity::GuildId::new(chat_id)
            .edit_member(
                &self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new().disable_communication_until_datetime(until),
            )
            .await
            .map(|_| ())
            .map_err(actuator_err)
    }

    async fn ban_user(&self, chat_id: u64, user_id: u64) -> Result<(), ModerationError> {
        serenity::GuildId::new(chat_id)
            .ban(&self.http, serenity::UserId::new(user_id), 0)
            .await
            .map_err(actuator_err)
    }

    async fn kick_user(&self, chat_id: u64, user_id: u64) -> Result<(), ModerationError> {
        serenity::GuildId::new(chat_id)
            .kick(&self.http, serenity::UserId::new(user_id))
            .await
            .map_err(actuator_err)
    }

    async fn block_user(&self, user_id: u64) -> Result<(), ModerationError> {
        let channel = serenity::UserId::new(user_id)
            .create_dm_channel(&self.http)
            .await
            .map_err(actuator_err)?;

        channel
            .id
            .delete(self.http.as_ref())
            .await
            .map(|_| ())
            .map_err(actuator_err)
    }

    async fn send_ephemeral(
        &self,
        channel_id: u64,
        text: &str,
        ttl: Duration,
    ) -> Result<(), ModerationError> {
        let channel_id = serenity::ChannelId::new(channel_id);
        let sent = channel_id
            .say(&self.http, text)
            .await
            .map_err(actuator_err)?;

        // Detached: a deletion still pending at shutdown is dropped and the
        // warning stays in the channel.
        let http = Arc::clone(&self.http);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = channel_id.delete_message(&http, sent.id).await {
                tracing::warn!("Failed to remove warning message: {}", e);
            }
        });

        Ok(())
    }
}

#[async_trait]
impl MemberDirectory for SerenityActuator {
    async fn deleted_members(&self, chat_id: u64) -> Result<Vec<u64>, ModerationError> {
        let guild_id = serenity::GuildId::new(chat_id);
        let mut deleted = Vec::new();
        let mut after = None;

        loop {
            let page = self
                .http
                .get_guild_members(guild_id, Some(MEMBER_PAGE), after)
                .await
                .map_err(actuator_err)?;

            deleted.extend(
                page.iter()
                    .filter(|member| is_deleted_account(&member.user))
                    .map(|member| member.user.id.get()),
            );

            match page.last() {
                Some(last) if page.len() as u64 == MEMBER_PAGE => after = Some(last.user.id.get()),
                _ => break,
            }
        }

        Ok(deleted)
    }
}
