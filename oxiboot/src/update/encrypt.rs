//! Encryption-at-rest for the UPDATE partition. The swap engine reads
//! and writes UPDATE through a keystream transform so the staged image
//! (and the backup it leaves behind) never hits external flash in the
//! clear. The keystream position is derived from the partition byte
//! offset, so any sector decrypts independently of the others.
//!
//! Key material is `key ‖ nonce` in a dedicated nonvolatile slot sector;
//! the external writer provisions a fresh nonce with every staged
//! update.

use crate::constants::{ENCRYPT_KEY_SIZE, ENCRYPT_NONCE_SIZE};

#[cfg(any(feature = "encrypt-aes128", feature = "encrypt-aes256"))]
use aes::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
#[cfg(feature = "encrypt-chacha")]
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};

#[cfg(feature = "encrypt-aes128")]
type UpdateCipher = ctr::Ctr128BE<aes::Aes128>;
#[cfg(feature = "encrypt-aes256")]
type UpdateCipher = ctr::Ctr128BE<aes::Aes256>;
#[cfg(feature = "encrypt-chacha")]
type UpdateCipher = chacha20::ChaCha20;

/// Key material as stored in the key slot.
#[derive(Debug, Clone, Copy)]
pub struct EncryptKey {
    pub key: [u8; ENCRYPT_KEY_SIZE],
    pub nonce: [u8; ENCRYPT_NONCE_SIZE],
}

impl EncryptKey {
    pub fn from_slot_bytes(raw: &[u8; ENCRYPT_KEY_SIZE + ENCRYPT_NONCE_SIZE]) -> Self {
        let mut key = [0u8; ENCRYPT_KEY_SIZE];
        let mut nonce = [0u8; ENCRYPT_NONCE_SIZE];
        key.copy_from_slice(&raw[..ENCRYPT_KEY_SIZE]);
        nonce.copy_from_slice(&raw[ENCRYPT_KEY_SIZE..]);
        EncryptKey { key, nonce }
    }

    pub fn slot_bytes(&self) -> [u8; ENCRYPT_KEY_SIZE + ENCRYPT_NONCE_SIZE] {
        let mut raw = [0u8; ENCRYPT_KEY_SIZE + ENCRYPT_NONCE_SIZE];
        raw[..ENCRYPT_KEY_SIZE].copy_from_slice(&self.key);
        raw[ENCRYPT_KEY_SIZE..].copy_from_slice(&self.nonce);
        raw
    }
}

/// Applies the keystream to `buf` as if it sat at partition byte
/// `offset`. Encrypt and decrypt are the same operation.
pub fn xcrypt(key: &EncryptKey, offset: usize, buf: &mut [u8]) {
    let mut cipher = UpdateCipher::new((&key.key).into(), (&key.nonce).into());
    cipher.seek(offset as u64);
    cipher.apply_keystream(buf);
}
