pub mod medication;
pub mod reminder;

pub use medication::*;
pub use reminder::*;
