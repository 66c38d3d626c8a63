//! Cryptography and filesystem persistence for Lockbox objects.
//! PBKDF2-HMAC-SHA256 key derivation, AES-256-CBC with PKCS#7 padding, and a
//! directory-backed `ObjectStore` with atomic artifact writes.

pub mod cipher;
pub mod fs_store;
pub mod kdf;
