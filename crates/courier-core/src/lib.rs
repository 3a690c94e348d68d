//! # Courier Core
//!
//! Shared vocabulary for the Courier workspace: the task data model,
//! the collaborator traits the worker consumes (repositories, mailer,
//! webhook client), configuration, and the error type.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CourierConfig;
pub use error::{CourierError, Result};
