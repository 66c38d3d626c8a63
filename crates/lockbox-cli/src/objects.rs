use std::{
    fs,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use lockbox_core::{error::VaultError, object::ObjectId, store::ObjectStore};
use lockbox_vault::{ObjectStatus, VaultService};
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::policy::{self, UploadPolicy};

const FALLBACK_OUTPUT_NAME: &str = "decrypted_file";

/// Inputs for `lockbox get`.
#[derive(Debug, Clone)]
pub struct GetRequest {
    pub id: String,
    pub password: Option<String>,
    pub out: Option<PathBuf>,
    pub session: String,
    /// Print text payloads instead of writing them to disk.
    pub show: bool,
}

/// Read one password line from `input`. Returns `None` at end of input.
pub fn read_password<R: BufRead>(input: &mut R, prompt: &str) -> Result<Option<String>> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']);
    Ok(Some(trimmed.to_string()))
}

/// Check the upload policy, then encrypt `file` into the vault.
pub async fn put<S: ObjectStore>(
    vault: &VaultService<S>,
    policy: &UploadPolicy,
    file: &Path,
    name: Option<String>,
    password: &str,
) -> Result<ObjectId> {
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .ok_or_else(|| eyre!("cannot derive a name from {}", file.display()))?,
    };
    let size = fs::metadata(file)?.len();
    policy.check(&name, size)?;

    let bytes = fs::read(file)?;
    let id = vault.store(&bytes, password, &name, Utc::now()).await?;
    Ok(id)
}

/// Decrypt an object to disk and return where it was written, or print it to
/// `stdout` when `show` is set (returns `None`).
///
/// Without `--password` the user is prompted until the password is accepted
/// or the session is locked out.
pub async fn get<S: ObjectStore, R: BufRead, W: Write>(
    vault: &VaultService<S>,
    request: GetRequest,
    input: &mut R,
    stdout: &mut W,
) -> Result<Option<PathBuf>> {
    let interactive = request.password.is_none();
    let mut supplied = request.password;

    loop {
        let password = match supplied.take() {
            Some(password) => password,
            None => read_password(input, "Password: ")?
                .ok_or_else(|| eyre!("no password provided"))?,
        };

        match vault
            .retrieve(&request.id, &password, &request.session, Utc::now())
            .await
        {
            Ok(payload) if request.show => {
                let text = policy::preview_text(payload.original_name(), payload.plaintext())?;
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
                return Ok(None);
            }
            Ok(payload) => {
                let dest = output_path(request.out.as_deref(), payload.original_name());
                write_output(&dest, payload.plaintext())?;
                eprintln!(
                    "Saved {} ({} bytes) to {}",
                    payload.original_name(),
                    payload.len(),
                    dest.display()
                );
                return Ok(Some(dest));
            }
            Err(VaultError::WrongPasswordOrCorrupt) if interactive => {
                let attempts = vault.attempts(&request.session, Utc::now());
                if attempts >= vault.max_attempts() {
                    return Err(VaultError::LockedOut { attempts }.into());
                }
                eprintln!(
                    "Incorrect password or corrupted file ({attempts}/{} attempts used)",
                    vault.max_attempts()
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Print an object's metadata and remaining lifetime.
pub async fn status<S: ObjectStore>(vault: &VaultService<S>, id: &str, as_json: bool) -> Result<()> {
    let now = Utc::now();
    let status = vault.status(id, now).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status_json(&status, now))?);
        return Ok(());
    }

    println!("{} {}", status.id, status.metadata.original_name);
    println!("    created: {}", status.metadata.created_at.to_rfc3339());
    if let Some(size) = status.metadata.size_bytes {
        println!("    size: {size} bytes");
    }
    println!(
        "    expires: {} ({})",
        status.expires_at.to_rfc3339(),
        format_remaining(&status, now)
    );
    Ok(())
}

fn status_json(status: &ObjectStatus, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "id": status.id.to_string(),
        "original_name": status.metadata.original_name,
        "created": status.metadata.created_at.to_rfc3339(),
        "size_bytes": status.metadata.size_bytes,
        "expires_at": status.expires_at.to_rfc3339(),
        "expired": status.expired,
        "remaining_secs": status.remaining(now).num_seconds(),
    })
}

fn format_remaining(status: &ObjectStatus, now: DateTime<Utc>) -> String {
    if status.expired {
        return "expired".to_string();
    }
    let remaining: Duration = status.remaining(now);
    format!(
        "{}h {}m left",
        remaining.num_hours(),
        remaining.num_minutes() % 60
    )
}

/// Destination for decrypted output. Stored names are reduced to their last
/// path component so they cannot point outside the working directory.
fn output_path(out: Option<&Path>, original_name: &str) -> PathBuf {
    if let Some(out) = out {
        return out.to_path_buf();
    }
    Path::new(original_name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_OUTPUT_NAME))
}

fn write_output(dest: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest)?;
    debug!(dest = %dest.display(), "wrote decrypted output");
    Ok(())
}
