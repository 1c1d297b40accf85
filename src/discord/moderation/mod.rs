// Discord side of moderation: event translation and the serenity actuator.

pub mod actuator;
pub mod events;

pub use actuator::SerenityActuator;
