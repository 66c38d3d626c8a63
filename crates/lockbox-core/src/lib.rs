//! Core abstractions for Lockbox: object model, storage contract, error taxonomy,
//! and the per-session access throttle.
//! This crate carries no cryptography and no filesystem code.

pub mod config;
pub mod error;
pub mod object;
pub mod store;
pub mod throttle;
