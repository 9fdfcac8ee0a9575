pub mod catalog;
pub mod events;

pub use catalog::*;
pub use events::*;
