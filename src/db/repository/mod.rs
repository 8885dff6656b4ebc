pub mod dose;
pub mod identity;
pub mod outbox;
pub mod schedule;
pub mod treatment;

pub use dose::*;
pub use identity::*;
pub use outbox::*;
pub use schedule::*;
pub use treatment::*;
