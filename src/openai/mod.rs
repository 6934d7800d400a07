pub mod core;
pub use self::core::*;

pub mod gateway;
pub use gateway::*;
