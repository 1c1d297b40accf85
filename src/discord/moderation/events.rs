// Translates gateway events into platform-neutral chat events and hands them
// to the moderation service.

use crate::core::moderation::{ChatEvent, EventKind, MessageRef};
use crate::discord::moderation::SerenityActuator;
use crate::discord::Data;
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use poise::serenity_prelude::{self as serenity, Context};

fn to_utc(timestamp: serenity::Timestamp) -> DateTime<Utc> {
    Utc.timestamp_opt(timestamp.unix_timestamp(), 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Only a forward-type reference counts. Replies and crossposts carry a
/// default-type reference.
fn is_forwarded(msg: &serenity::Message) -> bool {
    msg.message_reference
        .as_ref()
        .is_some_and(|r| matches!(r.kind, serenity::MessageReferenceKind::Forward))
}

fn message_kind(in_guild: bool, forwarded: bool) -> EventKind {
    match (in_guild, forwarded) {
        (false, _) => EventKind::DirectMessage,
        (true, true) => EventKind::Forward,
        (true, false) => EventKind::New,
    }
}

/// A forward keeps its own `content` empty; the forwarded text lives in the
/// snapshots.
fn scanned_text(msg: &serenity::Message) -> String {
    std::iter::once(msg.content.as_str())
        .chain(msg.message_snapshots.iter().map(|s| s.content.as_str()))
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Username plus display name, the text a joining member is screened on.
fn member_name_text(user: &serenity::User) -> String {
    match user.global_name.as_deref() {
        Some(display) if display != user.name => format!("{} {}", user.name, display),
        _ => user.name.clone(),
    }
}

fn chat_event_from_message(msg: &serenity::Message) -> ChatEvent {
    let channel_id = msg.channel_id.get();
    ChatEvent {
        kind: message_kind(msg.guild_id.is_some(), is_forwarded(msg)),
        chat_id: msg.guild_id.map(|id| id.get()),
        sender_id: msg.author.id.get(),
        message: Some(MessageRef {
            channel_id,
            message_id: msg.id.get(),
        }),
        text: Some(scanned_text(msg)),
        timestamp: to_utc(msg.timestamp),
    }
}

async fn dispatch(ctx: &Context, data: &Data, event: &ChatEvent) -> Result<Option<String>> {
    let actuator = SerenityActuator::new(ctx.http.clone());
    Ok(data.moderation.process(event, &actuator).await?)
}

pub async fn handle_message(ctx: &Context, data: &Data, msg: &serenity::Message) -> Result<()> {
    if msg.author.bot {
        return Ok(());
    }

    let event = chat_event_from_message(msg);

    // Only administrators ever get a reply, and only in their DM.
    if let Some(reply) = dispatch(ctx, data, &event).await? {
        msg.channel_id.say(&ctx.http, reply).await?;
    }

    Ok(())
}

pub async fn handle_message_update(
    ctx: &Context,
    data: &Data,
    update: &serenity::MessageUpdateEvent,
) -> Result<()> {
    let guild_id = match update.guild_id {
        Some(id) => id,
        None => return Ok(()),
    };

    // Embed-only updates carry no author or content.
    let (author, content) = match (update.author.as_ref(), update.content.as_ref()) {
        (Some(author), Some(content)) => (author, content),
        _ => return Ok(()),
    };
    if author.bot {
        return Ok(());
    }

    let event = ChatEvent {
        kind: EventKind::Edit,
        chat_id: Some(guild_id.get()),
        sender_id: author.id.get(),
        message: Some(MessageRef {
            channel_id: update.channel_id.get(),
            message_id: update.id.get(),
        }),
        text: Some(content.clone()),
        timestamp: update.edited_timestamp.map(to_utc).unwrap_or_else(Utc::now),
    };

    dispatch(ctx, data, &event).await?;
    Ok(())
}

pub async fn handle_member_join(
    ctx: &Context,
    data: &Data,
    member: &serenity::Member,
) -> Result<()> {
    if member.user.bot {
        return Ok(());
    }

    let event = ChatEvent {
        kind: EventKind::Join,
        chat_id: Some(member.guild_id.get()),
        sender_id: member.user.id.get(),
        message: None,
        text: Some(member_name_text(&member.user)),
        timestamp: Utc::now(),
    };

    dispatch(ctx, data, &event).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn author() -> serde_json::Value {
        json!({
            "id": "777",
            "username": "someone",
            "discriminator": "0",
            "global_name": null,
            "avatar": null
        })
    }

    fn gateway_message(
        content: &str,
        reference: serde_json::Value,
        snapshots: serde_json::Value,
    ) -> serenity::Message {
        serde_json::from_value(json!({
            "id": "9001",
            "channel_id": "55",
            "guild_id": "1000",
            "author": author(),
            "content": content,
            "timestamp": "2100-01-01T12:00:00.000000+00:00",
            "edited_timestamp": null,
            "tts": false,
            "mention_everyone": false,
            "mentions": [],
            "mention_roles": [],
            "attachments": [],
            "embeds": [],
            "reactions": [],
            "components": [],
            "sticker_items": [],
            "pinned": false,
            "type": 0,
            "flags": 16384,
            "message_reference": reference,
            "message_snapshots": snapshots
        }))
        .unwrap()
    }

    fn snapshot(content: &str) -> serde_json::Value {
        json!({
            "message": {
                "content": content,
                "timestamp": "2099-12-31T08:00:00.000000+00:00",
                "edited_timestamp": null,
                "mentions": [],
                "mention_roles": [],
                "attachments": [],
                "embeds": [],
                "components": [],
                "sticker_items": [],
                "type": 0,
                "flags": 0
            }
        })
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(message_kind(false, false), EventKind::DirectMessage);
        assert_eq!(message_kind(false, true), EventKind::DirectMessage);
        assert_eq!(message_kind(true, false), EventKind::New);
        assert_eq!(message_kind(true, true), EventKind::Forward);
    }

    #[test]
    fn test_forward_scans_snapshot_text() {
        let msg = gateway_message(
            "",
            json!({"type": 1, "message_id": "42", "channel_id": "66", "guild_id": "2000"}),
            json!([snapshot("buy spam now")]),
        );

        let event = chat_event_from_message(&msg);
        assert_eq!(event.kind, EventKind::Forward);
        assert_eq!(event.chat_id, Some(1000));
        assert_eq!(event.text.as_deref(), Some("buy spam now"));
    }

    #[test]
    fn test_forward_with_comment_keeps_both_texts() {
        let msg = gateway_message(
            "look at this",
            json!({"type": 1, "message_id": "42", "channel_id": "66"}),
            json!([snapshot("buy spam now")]),
        );
        assert_eq!(scanned_text(&msg), "look at this\nbuy spam now");
    }

    #[test]
    fn test_crosspost_from_other_channel_is_not_a_forward() {
        // Default-type reference pointing at another channel.
        let msg = gateway_message(
            "announcement",
            json!({"type": 0, "message_id": "42", "channel_id": "66", "guild_id": "2000"}),
            json!([]),
        );

        let event = chat_event_from_message(&msg);
        assert_eq!(event.kind, EventKind::New);
        assert_eq!(event.text.as_deref(), Some("announcement"));
    }

    #[test]
    fn test_plain_message() {
        let msg = gateway_message("hello", serde_json::Value::Null, json!([]));
        let event = chat_event_from_message(&msg);
        assert_eq!(event.kind, EventKind::New);
        assert_eq!(
            event.message,
            Some(MessageRef {
                channel_id: 55,
                message_id: 9001
            })
        );
    }

    #[test]
    fn test_member_name_text() {
        let mut user: serenity::User = serde_json::from_value(author()).unwrap();
        assert_eq!(member_name_text(&user), "someone");

        user.global_name = Some("Free Crypto".into());
        assert_eq!(member_name_text(&user), "someone Free Crypto");
    }

    #[test]
    fn test_timestamp_conversion() {
        let ts = serenity::Timestamp::from_unix_timestamp(4_102_488_000).unwrap();
        assert_eq!(
            to_utc(ts),
            Utc.with_ymd_and_hms(2100, 1, 1, 12, 0, 0).unwrap()
        );
    }
}
