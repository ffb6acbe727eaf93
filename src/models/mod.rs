pub mod alarm;
pub mod event;

pub use alarm::*;
pub use event::*;
