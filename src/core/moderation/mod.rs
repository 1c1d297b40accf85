// Core moderation module - the decision engine.
// Platform-agnostic: Discord lives in `crate::discord::moderation`.

pub mod activation_gate;
pub mod actuator;
pub mod admin_console;
pub mod anonymizer;
pub mod banned_words;
pub mod dm_throttle;
pub mod member_sweep;
pub mod moderation_config;
pub mod moderation_models;
pub mod moderation_service;
pub mod salt_rotation;
pub mod violation_tracker;

pub use actuator::{MemberDirectory, ModerationActuator};
pub use moderation_config::ModerationConfig;
pub use moderation_models::*;
pub use moderation_service::*;
