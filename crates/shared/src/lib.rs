//! Shared types for the cookbook client: remote API models and error taxonomy.

pub mod error;
pub mod models;

pub use error::*;
pub use models::*;
