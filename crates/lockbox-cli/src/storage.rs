use std::{path::PathBuf, sync::Arc};

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use lockbox_storage::fs_store::FsObjectStore;
use lockbox_vault::VaultService;
use tracing::debug;

/// Resolve the default object directory.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("lockbox").join("uploads"))
}

/// Build the on-disk object store, honoring the `data_dir` override.
pub fn store_from_config(config: &Config) -> Result<Arc<FsObjectStore>> {
    let root = match &config.data_dir {
        Some(root) => {
            debug!(?root, "initializing object store (config override)");
            root.clone()
        }
        None => {
            let root = default_data_dir()?;
            debug!(?root, "initializing object store");
            root
        }
    };
    Ok(Arc::new(FsObjectStore::new(root, config.vault.ttl())))
}

pub fn vault_from_config(config: &Config) -> Result<VaultService<FsObjectStore>> {
    Ok(VaultService::new(store_from_config(config)?, &config.vault))
}

/// Vault rooted at a temp dir with a cheap key derivation, for tests.
#[cfg(test)]
pub fn test_vault(root: impl Into<PathBuf>) -> VaultService<FsObjectStore> {
    use lockbox_storage::kdf::KeyDerivation;

    let config = Config::default();
    let store = Arc::new(FsObjectStore::new(root, config.vault.ttl()));
    VaultService::new(store, &config.vault).with_key_derivation(KeyDerivation::with_iterations(1))
}
