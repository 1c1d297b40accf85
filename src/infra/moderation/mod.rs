// Moderation storage implementations.

pub mod sqlite_moderation_store;

#[cfg(test)]
pub mod in_memory;

pub use sqlite_moderation_store::SqliteModerationStore;

#[cfg(test)]
pub use in_memory::InMemoryModerationStore;
