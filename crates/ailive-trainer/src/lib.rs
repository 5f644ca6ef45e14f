pub mod checkpoints;
pub mod config;
pub mod credential;
pub mod driver;
pub mod error;
pub mod log_redact;
pub mod session;
pub mod upload;
pub mod worker;

pub use error::{Error, Result};
