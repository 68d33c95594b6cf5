//! On-flash format constants. Every multi-byte integer in the manifest
//! and the trailer is little-endian; builds for big-endian cores keep the
//! wire format unchanged.

/* Image header */

/// First 4 bytes of every image: `'W','O','L','F'` read as a LE word.
pub const IMAGE_MAGIC: u32 = 0x464C4F57;
/// Last 4 bytes of a committed partition trailer: `'B','O','O','T'`.
pub const TRAILER_MAGIC: u32 = 0x544F4F42;

/// Magic + size words preceding the TLV stream.
pub const IMAGE_HEADER_OFFSET: usize = 8;

/// Fixed length of the header region. Zero-padded with `0xFF` up to this
/// size; the payload starts right after. Grows with the largest
/// signature the enabled algorithms can put in the manifest.
#[cfg(any(feature = "ml-dsa", feature = "xmss"))]
pub const IMAGE_HEADER_SIZE: usize = 4096;
#[cfg(all(
    not(any(feature = "ml-dsa", feature = "xmss")),
    any(feature = "lms", feature = "rsa4096")
))]
pub const IMAGE_HEADER_SIZE: usize = 2048;
#[cfg(all(
    not(any(feature = "ml-dsa", feature = "xmss", feature = "lms", feature = "rsa4096")),
    any(feature = "rsa2048", feature = "rsa3072", feature = "ed448")
))]
pub const IMAGE_HEADER_SIZE: usize = 1024;
#[cfg(not(any(
    feature = "ml-dsa",
    feature = "xmss",
    feature = "lms",
    feature = "rsa4096",
    feature = "rsa2048",
    feature = "rsa3072",
    feature = "ed448"
)))]
pub const IMAGE_HEADER_SIZE: usize = 256;

/* Manifest tags */

pub const HDR_END: u16 = 0x0000;
pub const HDR_VERSION: u16 = 0x0001;
pub const HDR_TIMESTAMP: u16 = 0x0002;
pub const HDR_SHA256: u16 = 0x0003;
pub const HDR_IMG_TYPE: u16 = 0x0004;
pub const HDR_IMG_DELTA_BASE: u16 = 0x0005;
pub const HDR_IMG_DELTA_SIZE: u16 = 0x0006;
pub const HDR_IMG_DELTA_BASE_HASH: u16 = 0x0007;
pub const HDR_PUBKEY: u16 = 0x0010;
pub const HDR_SECONDARY_CIPHER: u16 = 0x0011;
pub const HDR_SECONDARY_PUBKEY: u16 = 0x0012;
pub const HDR_SHA3_384: u16 = 0x0013;
pub const HDR_SHA384: u16 = 0x0014;
pub const HDR_IMG_DELTA_INVERSE: u16 = 0x0015;
pub const HDR_IMG_DELTA_INVERSE_SIZE: u16 = 0x0016;
pub const HDR_SIGNATURE: u16 = 0x0020;
pub const HDR_POLICY_SIGNATURE: u16 = 0x0021;
pub const HDR_SECONDARY_SIGNATURE: u16 = 0x0022;
pub const HDR_CERT_CHAIN: u16 = 0x0023;
pub const HDR_PADDING: u8 = 0xFF;

pub const HDR_VERSION_LEN: usize = 4;
pub const HDR_TIMESTAMP_LEN: usize = 8;
pub const HDR_IMG_TYPE_LEN: usize = 2;

/* IMG_TYPE field: 8 bits auth type | 4 bits extra features | 4 bits partition id */

pub const HDR_IMG_TYPE_AUTH_MASK: u16 = 0xFF00;
pub const HDR_IMG_TYPE_FEATURE_MASK: u16 = 0x00F0;
pub const HDR_IMG_TYPE_PART_MASK: u16 = 0x000F;
/// Extra-features nibble marking a delta (patch) payload.
pub const HDR_IMG_TYPE_DIFF: u16 = 0x00D0;
/// Extra-features bit marking a hybrid (dual-signature) manifest.
pub const HDR_IMG_TYPE_HYBRID: u16 = 0x0080;

pub const PART_ID_BOOTLOADER: u8 = 0;
pub const PART_ID_APP: u8 = 1;

/* Auth key types (IMG_TYPE high byte, keystore `key_type`) */

pub const AUTH_KEY_ED25519: u8 = 0x01;
pub const AUTH_KEY_ECC256: u8 = 0x02;
pub const AUTH_KEY_RSA2048: u8 = 0x03;
pub const AUTH_KEY_RSA4096: u8 = 0x04;
pub const AUTH_KEY_ED448: u8 = 0x05;
pub const AUTH_KEY_ECC384: u8 = 0x06;
pub const AUTH_KEY_ECC521: u8 = 0x07;
pub const AUTH_KEY_RSA3072: u8 = 0x08;
pub const AUTH_KEY_LMS: u8 = 0x09;
/* 0x0A..=0x0F reserved */
pub const AUTH_KEY_XMSS: u8 = 0x10;
pub const AUTH_KEY_ML_DSA: u8 = 0x11;

/* Keystore raw public key sizes, per key type */

pub const KEYSTORE_PUBKEY_SIZE_ED25519: usize = 32;
pub const KEYSTORE_PUBKEY_SIZE_ED448: usize = 57;
pub const KEYSTORE_PUBKEY_SIZE_ECC256: usize = 64;
pub const KEYSTORE_PUBKEY_SIZE_ECC384: usize = 96;
pub const KEYSTORE_PUBKEY_SIZE_ECC521: usize = 132;
pub const KEYSTORE_PUBKEY_SIZE_RSA2048: usize = 320;
pub const KEYSTORE_PUBKEY_SIZE_RSA3072: usize = 448;
pub const KEYSTORE_PUBKEY_SIZE_RSA4096: usize = 576;
pub const KEYSTORE_PUBKEY_SIZE_LMS: usize = 60;
pub const KEYSTORE_PUBKEY_SIZE_XMSS: usize = 68;
pub const KEYSTORE_PUBKEY_SIZE_ML_DSA: usize = 1312;

/// A key authorized for every partition id.
pub const KEY_VERIFY_ALL: u32 = 0xFFFF_FFFF;

pub const fn key_verify_only_id(id: u8) -> u32 {
    1 << id
}

/* Hash config */

pub const HDR_SHA256_LEN: usize = 32;
pub const HDR_SHA384_LEN: usize = 48;
pub const HDR_SHA3_384_LEN: usize = 48;

/// Payload streaming granularity for the hash engine.
pub const SHA_BLOCK_SIZE: usize = 256;

#[cfg(feature = "sha256")]
pub const HDR_HASH: u16 = HDR_SHA256;
#[cfg(feature = "sha384")]
pub const HDR_HASH: u16 = HDR_SHA384;
#[cfg(feature = "sha3-384")]
pub const HDR_HASH: u16 = HDR_SHA3_384;

#[cfg(feature = "sha256")]
pub const SHA_DIGEST_SIZE: usize = 32;
#[cfg(feature = "sha384")]
pub const SHA_DIGEST_SIZE: usize = 48;
#[cfg(feature = "sha3-384")]
pub const SHA_DIGEST_SIZE: usize = 48;

/* Partition states (trailer byte at end-5) */

#[cfg(not(feature = "flags-invert"))]
mod states {
    pub const IMG_STATE_NEW: u8 = 0xFF;
    pub const IMG_STATE_UPDATING: u8 = 0x70;
    pub const IMG_STATE_TESTING: u8 = 0x10;
    pub const IMG_STATE_SUCCESS: u8 = 0x00;
    pub const FLASH_BYTE_ERASED: u8 = 0xFF;

    pub const SECT_FLAG_NEW: u8 = 0x0F;
    pub const SECT_FLAG_SWAPPING: u8 = 0x07;
    pub const SECT_FLAG_BACKUP: u8 = 0x03;
    pub const SECT_FLAG_UPDATED: u8 = 0x00;
}

#[cfg(feature = "flags-invert")]
mod states {
    pub const IMG_STATE_NEW: u8 = 0x00;
    pub const IMG_STATE_UPDATING: u8 = 0x8F;
    pub const IMG_STATE_TESTING: u8 = 0xEF;
    pub const IMG_STATE_SUCCESS: u8 = 0xFF;
    pub const FLASH_BYTE_ERASED: u8 = 0x00;

    pub const SECT_FLAG_NEW: u8 = 0x00;
    pub const SECT_FLAG_SWAPPING: u8 = 0x01;
    pub const SECT_FLAG_BACKUP: u8 = 0x03;
    pub const SECT_FLAG_UPDATED: u8 = 0x07;
}

pub use states::*;

pub const PART_STATUS_LEN: usize = 1;
pub const MAGIC_TRAIL_LEN: usize = 4;

/// Sector-granular copies stream through a buffer of this size.
pub const FLASHBUFFER_SIZE: usize = 256;

/* Update-partition encryption */

#[cfg(feature = "encrypt-chacha")]
mod encrypt {
    pub const ENCRYPT_BLOCK_SIZE: usize = 64;
    pub const ENCRYPT_KEY_SIZE: usize = 32;
    pub const ENCRYPT_NONCE_SIZE: usize = 12;
}
#[cfg(feature = "encrypt-aes128")]
mod encrypt {
    pub const ENCRYPT_BLOCK_SIZE: usize = 16;
    pub const ENCRYPT_KEY_SIZE: usize = 16;
    pub const ENCRYPT_NONCE_SIZE: usize = 16;
}
#[cfg(feature = "encrypt-aes256")]
mod encrypt {
    pub const ENCRYPT_BLOCK_SIZE: usize = 16;
    pub const ENCRYPT_KEY_SIZE: usize = 32;
    pub const ENCRYPT_NONCE_SIZE: usize = 16;
}

#[cfg(any(
    feature = "encrypt-chacha",
    feature = "encrypt-aes128",
    feature = "encrypt-aes256"
))]
pub use encrypt::*;

/* Delta patch container */

/// `'O','X','P','T'` as a LE word, leading every patch stream.
pub const DELTA_PATCH_MAGIC: u32 = 0x5450584F;
pub const DELTA_OP_END: u8 = 0x00;
pub const DELTA_OP_COPY: u8 = 0x01;
pub const DELTA_OP_DATA: u8 = 0x02;
