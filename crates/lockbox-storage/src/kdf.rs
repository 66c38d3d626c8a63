use std::fmt;

use lockbox_core::object::{Salt, SALT_LEN};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

/// AES-256 key length.
pub const KEY_LEN: usize = 32;

/// PBKDF2 work factor for every stored object. Objects do not record it, so
/// changing it makes existing objects unreadable.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Symmetric key derived from a password. Zeroed on drop, never printed.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Salted, deliberately slow password-to-key derivation (PBKDF2-HMAC-SHA256).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDerivation {
    iterations: u32,
}

impl Default for KeyDerivation {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl KeyDerivation {
    /// Use a non-default work factor. Intended for tests; zero is raised to one.
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Deterministic for a given (password, salt). Empty passwords are accepted;
    /// length policy belongs to the caller.
    pub fn derive_key(&self, password: &[u8], salt: &Salt) -> DerivedKey {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        self.derive_into(password, salt, &mut key[..]);
        DerivedKey(key)
    }

    fn derive_into(&self, password: &[u8], salt: &[u8], out: &mut [u8]) {
        pbkdf2_hmac::<Sha256>(password, salt, self.iterations, out);
    }
}

/// Fresh salt from the OS random source.
pub fn random_salt() -> Salt {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
