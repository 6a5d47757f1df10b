// Public modules
pub mod agent;
pub mod config;
pub mod conflict;
pub mod error;
pub mod executor;
pub mod paths;
pub mod plan;
pub mod progress;
pub mod rollback;
pub mod ssh;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
