use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upload checks applied before anything reaches the vault.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadPolicy {
    /// Largest accepted payload, in bytes.
    pub max_upload_bytes: u64,
    /// Accepted file extensions, compared case-insensitively.
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_upload_bytes: 16 * 1024 * 1024,
            allowed_extensions: ["txt", "pdf", "png", "jpg", "jpeg", "docx", "zip", "mp4", "mov"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Names that `lockbox get --show` will print.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "csv", "log", "json", "xml", "html", "htm", "js", "css", "py",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("file type not allowed: {name}")]
    ExtensionNotAllowed { name: String },
    #[error("file is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("only text files can be previewed")]
    NotText,
    #[error("file contains binary data and cannot be previewed")]
    BinaryContent,
}

fn extension(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(_, ext)| ext)
}

/// Borrow a decrypted payload as text for display.
///
/// The stored name must carry a text extension and the bytes must be UTF-8.
pub fn preview_text<'a>(name: &str, bytes: &'a [u8]) -> Result<&'a str, PolicyError> {
    let is_text = extension(name).is_some_and(|ext| {
        TEXT_EXTENSIONS
            .iter()
            .any(|text| text.eq_ignore_ascii_case(ext))
    });
    if !is_text {
        return Err(PolicyError::NotText);
    }
    std::str::from_utf8(bytes).map_err(|_| PolicyError::BinaryContent)
}

impl UploadPolicy {
    pub fn check(&self, name: &str, size: u64) -> Result<(), PolicyError> {
        if !self.extension_allowed(name) {
            return Err(PolicyError::ExtensionNotAllowed {
                name: name.to_string(),
            });
        }
        if size > self.max_upload_bytes {
            return Err(PolicyError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    fn extension_allowed(&self, name: &str) -> bool {
        let Some(ext) = extension(name) else {
            return false;
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}
