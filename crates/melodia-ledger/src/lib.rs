//! # melodia-ledger
//!
//! Persistent ledger of song requests and connected accounts (SQLite-backed).

pub mod store;

pub use store::Store;
