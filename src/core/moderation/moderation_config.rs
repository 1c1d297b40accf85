// Moderation configuration - validated once at startup, immutable afterwards.
//
// Parsing works over a key lookup function instead of `std::env` directly,
// so tests can feed it a plain map.

use super::moderation_service::ModerationError;
use std::collections::HashSet;
use std::time::Duration;

const DAY_SECS: u64 = 24 * 60 * 60;

pub const DEFAULT_DATABASE_PATH: &str = "data/moderation.db";

/// Policy knobs. The DM values are clamped, everything else is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationPolicy {
    /// Messages allowed per DM window before ban + block, clamped to [5, 1000].
    pub dm_threshold: u32,
    /// DM window, clamped to [1, 30] days.
    pub dm_window: Duration,
    pub violation_window: Duration,
    pub mute_duration: Duration,
    pub warning_ttl: Duration,
    pub rotation_interval: Duration,
    pub rotation_check_interval: Duration,
    /// How often deleted accounts are swept out of the chat.
    pub member_sweep_interval: Duration,
    /// Upper bound on a single actuator call.
    pub actuator_timeout: Duration,
}

impl ModerationPolicy {
    pub const MIN_DM_THRESHOLD: u32 = 5;
    pub const MAX_DM_THRESHOLD: u32 = 1000;
    pub const MIN_DM_WINDOW_DAYS: u64 = 1;
    pub const MAX_DM_WINDOW_DAYS: u64 = 30;

    /// Build a policy, clamping the configurable values into range.
    pub fn new(dm_threshold: u32, dm_window_days: u64, actuator_timeout_secs: u64) -> Self {
        let days = dm_window_days.clamp(Self::MIN_DM_WINDOW_DAYS, Self::MAX_DM_WINDOW_DAYS);
        Self {
            dm_threshold: dm_threshold.clamp(Self::MIN_DM_THRESHOLD, Self::MAX_DM_THRESHOLD),
            dm_window: Duration::from_secs(days * DAY_SECS),
            actuator_timeout: Duration::from_secs(actuator_timeout_secs.clamp(1, 60)),
            ..Self::default()
        }
    }

    pub fn dm_window_days(&self) -> u64 {
        self.dm_window.as_secs() / DAY_SECS
    }
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            dm_threshold: 50,
            dm_window: Duration::from_secs(7 * DAY_SECS),
            violation_window: Duration::from_secs(7 * DAY_SECS),
            mute_duration: Duration::from_secs(12 * 60 * 60),
            warning_ttl: Duration::from_secs(30),
            rotation_interval: Duration::from_secs(DAY_SECS),
            rotation_check_interval: Duration::from_secs(60 * 60),
            member_sweep_interval: Duration::from_secs(60 * 60),
            actuator_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the engine needs to start.
#[derive(Clone)]
pub struct ModerationConfig {
    pub target_chat_id: u64,
    pub admin_ids: HashSet<u64>,
    /// Decoded `SALT`. `None` means rotating mode.
    pub fixed_key: Option<Vec<u8>>,
    pub seed_banned_words: String,
    pub database_path: String,
    pub policy: ModerationPolicy,
}

// Hand-written so the fixed key never shows up in logs.
impl std::fmt::Debug for ModerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationConfig")
            .field("target_chat_id", &self.target_chat_id)
            .field("admin_count", &self.admin_ids.len())
            .field("fixed_key", &self.fixed_key.as_ref().map(|_| "<redacted>"))
            .field("database_path", &self.database_path)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ModerationConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ModerationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ModerationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let target_chat_id = get("TARGET_GUILD_ID")
            .ok_or_else(|| ModerationError::Config("TARGET_GUILD_ID is required".into()))?
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .ok_or_else(|| {
                ModerationError::Config("TARGET_GUILD_ID must be a non-zero integer".into())
            })?;

        let admin_ids = parse_admin_ids(
            &get("ADMIN_USER_IDS")
                .ok_or_else(|| ModerationError::Config("ADMIN_USER_IDS is required".into()))?,
        )?;

        let fixed_key = get("SALT").map(|salt| parse_salt(&salt)).transpose()?;

        let dm_threshold = parse_number(get("DM_SPAM_THRESHOLD"), "DM_SPAM_THRESHOLD", 50)?;
        let dm_window_days = parse_number(get("DM_SPAM_WINDOW_DAYS"), "DM_SPAM_WINDOW_DAYS", 7)?;
        let timeout_secs = parse_number(get("ACTUATOR_TIMEOUT_SECS"), "ACTUATOR_TIMEOUT_SECS", 10)?;

        Ok(Self {
            target_chat_id,
            admin_ids,
            fixed_key,
            seed_banned_words: get("BANNED_WORDS").unwrap_or_default(),
            database_path: get("DATABASE_PATH")
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            policy: ModerationPolicy::new(
                u32::try_from(dm_threshold).unwrap_or(u32::MAX),
                dm_window_days,
                timeout_secs,
            ),
        })
    }
}

fn parse_admin_ids(raw: &str) -> Result<HashSet<u64>, ModerationError> {
    let mut ids = HashSet::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = part.parse::<u64>().map_err(|_| {
            ModerationError::Config(format!("ADMIN_USER_IDS contains an invalid id: {part}"))
        })?;
        ids.insert(id);
    }
    if ids.is_empty() {
        return Err(ModerationError::Config(
            "ADMIN_USER_IDS must list at least one administrator".into(),
        ));
    }
    Ok(ids)
}

/// A fixed salt must be hex and at least 16 bytes long.
fn parse_salt(raw: &str) -> Result<Vec<u8>, ModerationError> {
    if raw.len() < 32 {
        return Err(ModerationError::Config(
            "SALT must be at least 32 hex characters".into(),
        ));
    }
    hex::decode(raw).map_err(|e| ModerationError::Config(format!("SALT is not valid hex: {e}")))
}

fn parse_number(value: Option<String>, key: &str, default: u64) -> Result<u64, ModerationError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| ModerationError::Config(format!("{key} must be a positive integer"))),
    }
}
