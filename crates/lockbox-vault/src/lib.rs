//! Vault orchestration: password-protected store/retrieve over an
//! `ObjectStore`, plus the background expiry reaper.

pub mod reaper;
pub mod service;

pub use reaper::{ExpiryReaper, ReaperHandle, ReaperState, SweepReport};
pub use service::{ObjectStatus, VaultService};
