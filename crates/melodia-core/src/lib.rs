//! # melodia-core
//!
//! Core types, traits, configuration, and error handling for the Melodia bot.

pub mod config;
pub mod error;
pub mod message;
pub mod records;
pub mod traits;

pub use config::shellexpand;
