use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lockbox_core::{
    config::VaultConfig,
    error::VaultError,
    object::{NewObject, ObjectId, ObjectMetadata, RetrievedPayload},
    store::ObjectStore,
    throttle::{AccessThrottle, Attempt},
};
use lockbox_storage::{
    cipher::{self, CryptoError},
    kdf::{self, KeyDerivation},
};
use tracing::{info, instrument, warn};

/// Which check rejected a decryption. Logged only; callers always see
/// `VaultError::WrongPasswordOrCorrupt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectReason {
    Padding,
    DigestMismatch,
}

impl RejectReason {
    fn as_str(self) -> &'static str {
        match self {
            RejectReason::Padding => "padding",
            RejectReason::DigestMismatch => "digest_mismatch",
        }
    }
}

/// Pre-flight view of an object, available without the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStatus {
    pub id: ObjectId,
    pub metadata: ObjectMetadata,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

impl ObjectStatus {
    /// Time left before expiry, clamped at zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Password-protected store/retrieve over an `ObjectStore`.
pub struct VaultService<S: ObjectStore> {
    store: Arc<S>,
    kdf: KeyDerivation,
    throttle: AccessThrottle,
    min_password_len: usize,
    ttl: Duration,
}

impl<S: ObjectStore> VaultService<S> {
    pub fn new(store: Arc<S>, config: &VaultConfig) -> Self {
        Self {
            store,
            kdf: KeyDerivation::default(),
            throttle: AccessThrottle::new(
                config.max_download_attempts,
                config.lockout_cooldown(),
            ),
            min_password_len: config.min_password_len,
            ttl: config.ttl(),
        }
    }

    /// Replace the key derivation work factor (tests use a cheap one).
    pub fn with_key_derivation(mut self, kdf: KeyDerivation) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn store_handle(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Encrypt `plaintext` under `password` and persist it.
    #[instrument(skip_all, fields(name = %original_name, size = plaintext.len()))]
    pub async fn store(
        &self,
        plaintext: &[u8],
        password: &str,
        original_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ObjectId, VaultError> {
        if password.chars().count() < self.min_password_len {
            return Err(VaultError::WeakPassword {
                min_len: self.min_password_len,
            });
        }

        let salt = kdf::random_salt();
        let iv = cipher::random_iv();
        let key = self.kdf.derive_key(password.as_bytes(), &salt);
        let ciphertext = cipher::encrypt(plaintext, &key, &iv);

        let object = NewObject {
            salt,
            iv,
            ciphertext,
            digest: cipher::plaintext_digest(plaintext),
            metadata: ObjectMetadata::new(original_name, now, plaintext.len() as u64),
        };
        let id = self.store.put(object).await?;

        info!(%id, "object stored");
        Ok(id)
    }

    /// Decrypt an object. Plaintext is released only after both the padding
    /// and the stored digest check out.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn retrieve(
        &self,
        id: &str,
        password: &str,
        session: &str,
        now: DateTime<Utc>,
    ) -> Result<RetrievedPayload, VaultError> {
        // Holds one slot of the session's budget until settled; early returns
        // below release it uncharged.
        let attempt = self
            .throttle
            .try_begin(session, now)
            .map_err(|attempts| VaultError::LockedOut { attempts })?;

        let object_id = parse_id(id)?;
        if !self.store.exists(&object_id).await? {
            return Err(not_found(id));
        }
        if self.store.is_expired(&object_id, now).await {
            return Err(VaultError::Expired { id: id.to_string() });
        }

        let object = self.store.get(&object_id).await?;
        let key = self.kdf.derive_key(password.as_bytes(), &object.salt);
        let plaintext = match cipher::decrypt(&object.ciphertext, &key, &object.iv) {
            Ok(plaintext) if cipher::plaintext_digest(&plaintext) == object.digest => plaintext,
            Ok(_) => return Err(self.reject(attempt, now, RejectReason::DigestMismatch)),
            Err(CryptoError::PaddingOrKey) => {
                return Err(self.reject(attempt, now, RejectReason::Padding))
            }
        };

        attempt.succeed();
        info!(name = %object.metadata.original_name, "object decrypted");
        Ok(RetrievedPayload::new(plaintext, object.metadata))
    }

    /// Unknown or malformed ids report as expired.
    pub async fn is_expired(&self, id: &str, now: DateTime<Utc>) -> bool {
        match parse_id(id) {
            Ok(object_id) => self.store.is_expired(&object_id, now).await,
            Err(_) => true,
        }
    }

    pub async fn status(&self, id: &str, now: DateTime<Utc>) -> Result<ObjectStatus, VaultError> {
        let object_id = parse_id(id)?;
        if !self.store.exists(&object_id).await? {
            return Err(not_found(id));
        }
        let metadata = self.store.metadata(&object_id).await?;
        let expires_at = metadata.expires_at(self.ttl);
        Ok(ObjectStatus {
            id: object_id,
            expired: metadata.is_expired(self.ttl, now),
            metadata,
            expires_at,
        })
    }

    /// Failed attempts recorded for a session.
    pub fn attempts(&self, session: &str, now: DateTime<Utc>) -> u32 {
        self.throttle.attempts(session, now)
    }

    pub fn max_attempts(&self) -> u32 {
        self.throttle.max_attempts()
    }

    /// Drop a session's counter when the caller's session ends.
    pub fn end_session(&self, session: &str) {
        self.throttle.end_session(session);
    }

    /// Forget sessions whose lockout cooldown has elapsed.
    pub fn prune_sessions(&self, now: DateTime<Utc>) -> usize {
        self.throttle.prune(now)
    }

    fn reject(&self, attempt: Attempt<'_>, now: DateTime<Utc>, reason: RejectReason) -> VaultError {
        let attempts = attempt.fail(now);
        warn!(
            reason = reason.as_str(),
            attempts,
            max_attempts = self.throttle.max_attempts(),
            "decryption rejected"
        );
        VaultError::WrongPasswordOrCorrupt
    }
}

fn parse_id(id: &str) -> Result<ObjectId, VaultError> {
    id.parse().map_err(|_| not_found(id))
}

fn not_found(id: &str) -> VaultError {
    VaultError::NotFound { id: id.to_string() }
}
