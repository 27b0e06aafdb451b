//! Shared message model and error plumbing used across the rainbow crates.

pub mod error;
pub mod types;

pub use error::FromMessage;
