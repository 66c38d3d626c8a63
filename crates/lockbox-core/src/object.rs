use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Length of the per-object key-derivation salt.
pub const SALT_LEN: usize = 16;
/// Length of the per-object cipher IV (one AES block).
pub const IV_LEN: usize = 16;
/// Length of a SHA-256 plaintext digest.
pub const DIGEST_LEN: usize = 32;

pub type Salt = [u8; SALT_LEN];
pub type Iv = [u8; IV_LEN];

const FIELD_NAME: &str = "original_name";
const FIELD_CREATED: &str = "created";
const FIELD_SIZE: &str = "file_size";

/// Errors raised while decoding persisted artifacts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid object id: {0}")]
    InvalidId(String),
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
    #[error("blob too short: {len} bytes")]
    BlobTooShort { len: usize },
    #[error("metadata is missing the `{0}` field")]
    MissingField(&'static str),
    #[error("metadata field `{field}` is malformed: {value}")]
    MalformedField { field: &'static str, value: String },
}

/// Opaque object identifier: a random UUID in canonical hyphenated form.
///
/// Parsing only accepts the canonical lowercase form, which also keeps
/// identifiers safe to use as file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Allocate a fresh identifier from the OS random source.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ObjectId {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::try_parse(s).map_err(|_| FormatError::InvalidId(s.to_string()))?;
        if uuid.hyphenated().to_string() != s {
            return Err(FormatError::InvalidId(s.to_string()));
        }
        Ok(Self(uuid))
    }
}

/// SHA-256 digest of the original plaintext, stored hex-encoded in a sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaintextDigest([u8; DIGEST_LEN]);

impl PlaintextDigest {
    pub fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self, FormatError> {
        let trimmed = text.trim();
        let mut out = [0u8; DIGEST_LEN];
        hex::decode_to_slice(trimmed, &mut out)
            .map_err(|e| FormatError::InvalidDigest(e.to_string()))?;
        Ok(Self(out))
    }
}

/// Cleartext metadata persisted next to each object as `key:value` lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    pub original_name: String,
    pub created_at: DateTime<Utc>,
    /// Plaintext length; absent in metadata written by older tooling.
    pub size_bytes: Option<u64>,
}

impl ObjectMetadata {
    pub fn new(original_name: &str, created_at: DateTime<Utc>, size_bytes: u64) -> Self {
        Self {
            original_name: sanitize_name(original_name),
            created_at,
            size_bytes: Some(size_bytes),
        }
    }

    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// An object is expired strictly after `created_at + ttl`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now > self.expires_at(ttl)
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "{FIELD_NAME}:{}\n{FIELD_CREATED}:{}\n",
            self.original_name,
            self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        );
        if let Some(size) = self.size_bytes {
            out.push_str(&format!("{FIELD_SIZE}:{size}\n"));
        }
        out
    }

    /// Parse sidecar text. `created` is required; a missing name falls back to
    /// a generated `decrypted_file_*` name and `file_size` is optional.
    /// Unknown keys are ignored and the first occurrence of a key wins.
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let mut name: Option<String> = None;
        let mut created: Option<&str> = None;
        let mut size: Option<&str> = None;

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                FIELD_NAME => {
                    name.get_or_insert_with(|| value.to_string());
                }
                FIELD_CREATED => {
                    created.get_or_insert(value);
                }
                FIELD_SIZE => {
                    size.get_or_insert(value);
                }
                _ => {}
            }
        }

        let created = created.ok_or(FormatError::MissingField(FIELD_CREATED))?;
        let created_at = parse_timestamp(created).ok_or_else(|| FormatError::MalformedField {
            field: FIELD_CREATED,
            value: created.to_string(),
        })?;
        let size_bytes = size
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| FormatError::MalformedField {
                    field: FIELD_SIZE,
                    value: raw.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            original_name: name.unwrap_or_else(fallback_name),
            created_at,
            size_bytes,
        })
    }
}

/// Accepts RFC 3339, or a naive ISO-8601 timestamp interpreted as local time.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

fn sanitize_name(name: &str) -> String {
    name.replace(['\r', '\n'], "_")
}

fn fallback_name() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("decrypted_file_{}", &simple[..8])
}

/// Artifacts produced by a store operation, before an id is assigned.
#[derive(Debug, Clone)]
pub struct NewObject {
    pub salt: Salt,
    pub iv: Iv,
    pub ciphertext: Vec<u8>,
    pub digest: PlaintextDigest,
    pub metadata: ObjectMetadata,
}

impl NewObject {
    /// Binary blob layout: salt (16) | iv (16) | padded ciphertext.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(SALT_LEN + IV_LEN + self.ciphertext.len());
        blob.extend_from_slice(&self.salt);
        blob.extend_from_slice(&self.iv);
        blob.extend_from_slice(&self.ciphertext);
        blob
    }

    pub fn with_id(self, id: ObjectId) -> StoredObject {
        StoredObject {
            id,
            salt: self.salt,
            iv: self.iv,
            ciphertext: self.ciphertext,
            digest: self.digest,
            metadata: self.metadata,
        }
    }
}

/// A fully persisted object as read back from a store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub id: ObjectId,
    pub salt: Salt,
    pub iv: Iv,
    pub ciphertext: Vec<u8>,
    pub digest: PlaintextDigest,
    pub metadata: ObjectMetadata,
}

impl StoredObject {
    pub fn from_blob(
        id: ObjectId,
        blob: &[u8],
        digest: PlaintextDigest,
        metadata: ObjectMetadata,
    ) -> Result<Self, FormatError> {
        if blob.len() < SALT_LEN + IV_LEN {
            return Err(FormatError::BlobTooShort { len: blob.len() });
        }
        let (salt, rest) = blob.split_at(SALT_LEN);
        let (iv, ciphertext) = rest.split_at(IV_LEN);

        let mut salt_out = [0u8; SALT_LEN];
        salt_out.copy_from_slice(salt);
        let mut iv_out = [0u8; IV_LEN];
        iv_out.copy_from_slice(iv);

        Ok(Self {
            id,
            salt: salt_out,
            iv: iv_out,
            ciphertext: ciphertext.to_vec(),
            digest,
            metadata,
        })
    }
}

/// Decrypted plaintext handed to a caller. The buffer is zeroed on drop.
pub struct RetrievedPayload {
    plaintext: Zeroizing<Vec<u8>>,
    original_name: String,
    metadata: ObjectMetadata,
}

impl RetrievedPayload {
    pub fn new(plaintext: Zeroizing<Vec<u8>>, metadata: ObjectMetadata) -> Self {
        Self {
            plaintext,
            original_name: metadata.original_name.clone(),
            metadata,
        }
    }

    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.plaintext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext.is_empty()
    }
}

impl fmt::Debug for RetrievedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievedPayload")
            .field("original_name", &self.original_name)
            .field("len", &self.plaintext.len())
            .finish_non_exhaustive()
    }
}
