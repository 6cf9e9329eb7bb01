//! Shared types for Parley

pub mod error;

pub use error::{ParleyError, Result};
