pub mod error;
pub mod logger;
pub mod monitor;
pub mod time;
pub mod validation;
