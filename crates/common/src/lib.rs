//! Shared types for the API access workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
