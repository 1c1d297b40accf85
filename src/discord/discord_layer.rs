// Discord layer - event handlers and the platform actuator.

use crate::core::moderation::moderation_service::ModerationService;
use crate::infra::moderation::SqliteModerationStore;
use std::sync::Arc;

#[path = "moderation/mod.rs"]
pub mod moderation;

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Shared state handed to every event handler.
pub struct Data {
    pub moderation: Arc<ModerationService<SqliteModerationStore>>,
}
