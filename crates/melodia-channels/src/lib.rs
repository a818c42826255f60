//! # melodia-channels
//!
//! Messaging transport adapters for Melodia.

pub mod loopback;
pub mod qr;

pub use loopback::LoopbackTransport;
