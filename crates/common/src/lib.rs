//! Shared types for the dashboard workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
