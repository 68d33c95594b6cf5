//! The hash engine behind the manifest digest, the keystore pubkey hints
//! and (when enabled) the TPM measurements. One algorithm per build.

use sha2::Digest;

use crate::constants::SHA_DIGEST_SIZE;

#[cfg(feature = "sha256")]
pub type ImageHasher = sha2::Sha256;
#[cfg(feature = "sha384")]
pub type ImageHasher = sha2::Sha384;
#[cfg(feature = "sha3-384")]
pub type ImageHasher = sha3::Sha3_384;

pub type ImageDigest = [u8; SHA_DIGEST_SIZE];

pub fn finalize(hasher: ImageHasher) -> ImageDigest {
    hasher.finalize().into()
}

/// One-shot digest, used for keystore pubkeys and small policy buffers.
pub fn hash_all(data: &[u8]) -> ImageDigest {
    let mut h = ImageHasher::new();
    h.update(data);
    finalize(h)
}

/// Digest of a keystore slot's raw public key. The manifest's PUBKEY TLV
/// carries this value rather than the key itself.
pub fn key_hash(pubkey: &[u8]) -> ImageDigest {
    hash_all(pubkey)
}
