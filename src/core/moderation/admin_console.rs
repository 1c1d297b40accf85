// Administrator commands over the DM channel.
//
// Parsing and canned replies only; the service runs the commands.

use super::banned_words::{format_terms, AddTermsOutcome, RemoveTermsOutcome};
use super::moderation_config::ModerationPolicy;

pub const NO_VALID_WORDS: &str = "No valid words provided.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Activate,
    AddWords(String),
    RemoveWords(String),
    Status,
    Help,
}

impl AdminCommand {
    /// Anything unrecognised is `Help`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };

        match head.to_lowercase().as_str() {
            "/activate" => AdminCommand::Activate,
            "/addwords" => AdminCommand::AddWords(rest.to_string()),
            "/removewords" => AdminCommand::RemoveWords(rest.to_string()),
            "/status" => AdminCommand::Status,
            _ => AdminCommand::Help,
        }
    }
}

pub fn format_added(outcome: &AddTermsOutcome) -> String {
    format!(
        "Added: {} | Skipped: {}",
        format_terms(&outcome.added),
        format_terms(&outcome.skipped)
    )
}

pub fn format_removed(outcome: &RemoveTermsOutcome) -> String {
    format!(
        "Removed: {} | Not found: {}",
        format_terms(&outcome.removed),
        format_terms(&outcome.not_found)
    )
}

pub fn help_text(policy: &ModerationPolicy) -> String {
    format!(
        "Moderation commands:\n\
         /activate - start moderating (one-way)\n\
         /addwords a, b, c - add banned words\n\
         /removewords a, b - remove banned words\n\
         /status - aggregate statistics\n\
         \n\
         First violation: message deleted, 12h mute. Second within 7 days: permanent ban.\n\
         DM limit: {} messages per {} day(s) before ban + block.",
        policy.dm_threshold,
        policy.dm_window_days()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::banned_words::normalize_terms;
    use std::collections::BTreeSet;

    #[test]
    fn test_parse_commands() {
        assert_eq!(AdminCommand::parse("/activate"), AdminCommand::Activate);
        assert_eq!(AdminCommand::parse("  /STATUS  "), AdminCommand::Status);
        assert_eq!(
            AdminCommand::parse("/addwords spam, scam"),
            AdminCommand::AddWords("spam, scam".into())
        );
        assert_eq!(
            AdminCommand::parse("/removewords\nspam"),
            AdminCommand::RemoveWords("spam".into())
        );
        assert_eq!(AdminCommand::parse("/addwords"), AdminCommand::AddWords(String::new()));
    }

    #[test]
    fn test_unknown_input_is_help() {
        assert_eq!(AdminCommand::parse(""), AdminCommand::Help);
        assert_eq!(AdminCommand::parse("hello"), AdminCommand::Help);
        assert_eq!(AdminCommand::parse("/activatex"), AdminCommand::Help);
    }

    #[test]
    fn test_format_added() {
        let outcome = AddTermsOutcome {
            added: normalize_terms("spam"),
            skipped: normalize_terms("scam,virus"),
        };
        assert_eq!(format_added(&outcome), "Added: spam | Skipped: scam, virus");
    }

    #[test]
    fn test_long_add_reply_fits_one_message() {
        // Roughly what fits in a single 2000-character /addwords message.
        let raw = (0..330).map(|i| format!("w{:04}", i)).collect::<Vec<_>>().join(",");
        let terms = normalize_terms(&raw);
        let (added, skipped): (BTreeSet<String>, BTreeSet<String>) =
            terms.into_iter().partition(|t| t.ends_with('0') || t.ends_with('5'));
        let reply = format_added(&AddTermsOutcome { added, skipped });

        assert!(reply.chars().count() < 2000);
        assert!(reply.starts_with("Added: w0000"));
        assert!(reply.contains("more"));
    }

    #[test]
    fn test_help_mentions_policy() {
        let text = help_text(&ModerationPolicy::new(80, 3, 10));
        assert!(text.contains("80 messages per 3 day(s)"));
        assert!(text.contains("/addwords"));
    }
}
