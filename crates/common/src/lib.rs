//! Shared types for the image gateway workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
