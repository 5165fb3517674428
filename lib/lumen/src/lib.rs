/// Public identifier of a registered player. Slot index + 1, so the value 0
/// is free to denote the ball in wire messages.
pub type PlayerId = u32;

pub mod logging;
pub mod time;
