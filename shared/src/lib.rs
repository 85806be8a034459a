pub mod protocol;
pub mod entities;

pub use protocol::*;
pub use entities::*;
