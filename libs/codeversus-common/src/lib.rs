pub mod config;
pub mod error;
pub mod redis;
pub mod store;
pub mod template;
pub mod types;

pub use error::{JudgeError, Result};
