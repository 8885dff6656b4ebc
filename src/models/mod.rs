pub mod dose;
pub mod enums;
pub mod treatment;

pub use dose::*;
pub use enums::*;
pub use treatment::*;
