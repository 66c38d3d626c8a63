use aes::Aes256;
use cbc::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut,
    KeyIvInit,
};
use lockbox_core::object::{Iv, PlaintextDigest, IV_LEN};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::kdf::DerivedKey;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block length; ciphertexts are always a non-zero multiple of it.
pub const BLOCK_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Decrypted bytes do not end in valid PKCS#7 padding, which is what a
    /// wrong key almost always produces.
    #[error("invalid padding or wrong key")]
    PaddingOrKey,
}

/// AES-256-CBC encryption with PKCS#7 padding. A plaintext whose length is
/// already block-aligned gains one full padding block.
pub fn encrypt(plaintext: &[u8], key: &DerivedKey, iv: &Iv) -> Vec<u8> {
    Aes256CbcEnc::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv),
    )
    .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub fn decrypt(
    ciphertext: &[u8],
    key: &DerivedKey,
    iv: &Iv,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    Aes256CbcDec::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv),
    )
    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    .map(Zeroizing::new)
    .map_err(|_| CryptoError::PaddingOrKey)
}

/// Fresh IV from the OS random source.
pub fn random_iv() -> Iv {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// SHA-256 over the exact plaintext bytes.
pub fn plaintext_digest(plaintext: &[u8]) -> PlaintextDigest {
    PlaintextDigest::new(Sha256::digest(plaintext).into())
}
