use serde::{Deserialize, Serialize};

/// Tunables shared by the vault service and the expiry reaper.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct VaultConfig {
    /// Object time-to-live, in hours.
    pub file_expiry_hours: u64,
    /// Consecutive failed decryptions allowed per session before lockout.
    pub max_download_attempts: u32,
    /// Minimum password length accepted by `store`, in characters.
    pub min_password_len: usize,
    /// Pause between two reaper sweeps, in seconds.
    pub sweep_interval_secs: u64,
    /// Pause after a failed sweep, in seconds.
    pub sweep_retry_secs: u64,
    /// When set, a session's failure counter resets this many seconds after
    /// its last failure. Unset means the counter only resets on success.
    pub lockout_cooldown_secs: Option<u64>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            file_expiry_hours: 24,
            max_download_attempts: 3,
            min_password_len: 6,
            sweep_interval_secs: 60 * 60,
            sweep_retry_secs: 60,
            lockout_cooldown_secs: None,
        }
    }
}

impl VaultConfig {
    pub fn ttl(&self) -> chrono::Duration {
        i64::try_from(self.file_expiry_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_retry(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_retry_secs)
    }

    pub fn lockout_cooldown(&self) -> Option<chrono::Duration> {
        self.lockout_cooldown_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
    }
}
