pub mod cli;
pub mod config;
pub mod core;

pub use config::*;
pub use self::core::*;
