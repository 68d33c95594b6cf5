//! Manifest builder and image signer. Field order and alignment follow
//! the bootloader's expectations: VERSION value 4-byte aligned,
//! TIMESTAMP and every digest/signature value 8-byte aligned, `0xFF`
//! padding in between, digest TLV appended after all hashed fields and
//! signatures appended after the digest.

use byteorder::{ByteOrder, LittleEndian};
use sha2::Digest;

use oxiboot::constants::*;

use crate::curve::SigningKeyType;
use crate::{ObSignerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha384,
    Sha3_384,
}

impl HashAlg {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sha256" => Ok(HashAlg::Sha256),
            "sha384" => Ok(HashAlg::Sha384),
            "sha3" | "sha3-384" => Ok(HashAlg::Sha3_384),
            _ => Err(ObSignerError::BadHashValue),
        }
    }

    pub fn header_tag(self) -> u16 {
        match self {
            HashAlg::Sha256 => HDR_SHA256,
            HashAlg::Sha384 => HDR_SHA384,
            HashAlg::Sha3_384 => HDR_SHA3_384,
        }
    }

    pub fn digest_size(self) -> usize {
        match self {
            HashAlg::Sha256 => HDR_SHA256_LEN,
            HashAlg::Sha384 => HDR_SHA384_LEN,
            HashAlg::Sha3_384 => HDR_SHA3_384_LEN,
        }
    }

    pub fn hash(self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            HashAlg::Sha256 => {
                let mut h = sha2::Sha256::new();
                for p in parts {
                    h.update(p);
                }
                h.finalize().to_vec()
            }
            HashAlg::Sha384 => {
                let mut h = sha2::Sha384::new();
                for p in parts {
                    h.update(p);
                }
                h.finalize().to_vec()
            }
            HashAlg::Sha3_384 => {
                let mut h = sha3::Sha3_384::new();
                for p in parts {
                    h.update(p);
                }
                h.finalize().to_vec()
            }
        }
    }
}

/// Delta-image manifest fields; `base_hash` is the base image's stored
/// digest TLV value.
#[derive(Debug, Clone)]
pub struct DeltaInfo {
    pub base_version: u32,
    pub base_hash: Vec<u8>,
    pub patch_len: u32,
    pub inverse_offset: u32,
    pub inverse_len: u32,
}

/// TPM sealing-policy fields: the signature covers
/// `pcr_mask ‖ policy_digest`.
#[derive(Debug, Clone)]
pub struct PolicyInfo {
    pub pcr_mask: u32,
    pub policy_digest: Vec<u8>,
}

pub struct SignParams<'k> {
    pub header_size: usize,
    pub version: u32,
    pub timestamp: u64,
    pub part_id: u8,
    pub hash: HashAlg,
    pub key: &'k SigningKeyType,
    pub secondary: Option<&'k SigningKeyType>,
    pub delta: Option<DeltaInfo>,
    pub policy: Option<PolicyInfo>,
}

impl<'k> SignParams<'k> {
    pub fn new(header_size: usize, version: u32, key: &'k SigningKeyType) -> Self {
        SignParams {
            header_size,
            version,
            timestamp: 0,
            part_id: PART_ID_APP,
            hash: HashAlg::Sha256,
            key,
            secondary: None,
            delta: None,
            policy: None,
        }
    }
}

fn append_u16(hdr: &mut Vec<u8>, val: u16) {
    let mut b = [0u8; 2];
    LittleEndian::write_u16(&mut b, val);
    hdr.extend_from_slice(&b);
}

fn append_tag(hdr: &mut Vec<u8>, tag: u16, value: &[u8]) {
    append_u16(hdr, tag);
    append_u16(hdr, value.len() as u16);
    hdr.extend_from_slice(value);
}

/// Pad so the next TLV's value field (4 bytes in) lands 8-byte aligned.
fn align8(hdr: &mut Vec<u8>) {
    while hdr.len() % 8 != 4 {
        hdr.push(HDR_PADDING);
    }
}

fn align4(hdr: &mut Vec<u8>) {
    while hdr.len() % 4 != 0 {
        hdr.push(HDR_PADDING);
    }
}

/// Builds `manifest ‖ payload`. The digest covers everything appended
/// before the digest TLV plus the payload; signatures cover the digest.
pub fn sign_image(payload: &[u8], params: &SignParams) -> Result<Vec<u8>> {
    if params.delta.is_some() && params.secondary.is_some() {
        return Err(ObSignerError::BadParams(
            "delta and hybrid manifests are mutually exclusive",
        ));
    }

    let mut hdr: Vec<u8> = Vec::with_capacity(params.header_size);
    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, IMAGE_MAGIC);
    hdr.extend_from_slice(&word);
    LittleEndian::write_u32(&mut word, payload.len() as u32);
    hdr.extend_from_slice(&word);

    /* no pad bytes, the version value is already 4-byte aligned */
    LittleEndian::write_u32(&mut word, params.version);
    append_tag(&mut hdr, HDR_VERSION, &word);

    align8(&mut hdr);
    let mut ts = [0u8; 8];
    LittleEndian::write_u64(&mut ts, params.timestamp);
    append_tag(&mut hdr, HDR_TIMESTAMP, &ts);

    let features: u16 = if params.delta.is_some() {
        HDR_IMG_TYPE_DIFF
    } else if params.secondary.is_some() {
        HDR_IMG_TYPE_HYBRID
    } else {
        0
    };
    let img_type: u16 =
        ((params.key.auth_type() as u16) << 8) | features | (params.part_id as u16 & 0x0F);
    let mut half = [0u8; 2];
    LittleEndian::write_u16(&mut half, img_type);
    append_tag(&mut hdr, HDR_IMG_TYPE, &half);

    if let Some(delta) = &params.delta {
        align4(&mut hdr);
        LittleEndian::write_u32(&mut word, delta.base_version);
        append_tag(&mut hdr, HDR_IMG_DELTA_BASE, &word);
        LittleEndian::write_u32(&mut word, delta.patch_len);
        append_tag(&mut hdr, HDR_IMG_DELTA_SIZE, &word);
        align4(&mut hdr);
        LittleEndian::write_u32(&mut word, delta.inverse_offset);
        append_tag(&mut hdr, HDR_IMG_DELTA_INVERSE, &word);
        LittleEndian::write_u32(&mut word, delta.inverse_len);
        append_tag(&mut hdr, HDR_IMG_DELTA_INVERSE_SIZE, &word);
        align8(&mut hdr);
        append_tag(&mut hdr, HDR_IMG_DELTA_BASE_HASH, &delta.base_hash);
    }

    align8(&mut hdr);
    let pubkey_digest = params.hash.hash(&[&params.key.pubkey_bytes()]);
    append_tag(&mut hdr, HDR_PUBKEY, &pubkey_digest);
    align8(&mut hdr);

    if let Some(secondary) = params.secondary {
        LittleEndian::write_u16(&mut half, (secondary.auth_type() as u16) << 8);
        append_tag(&mut hdr, HDR_SECONDARY_CIPHER, &half);
        align8(&mut hdr);
        let digest = params.hash.hash(&[&secondary.pubkey_bytes()]);
        append_tag(&mut hdr, HDR_SECONDARY_PUBKEY, &digest);
    }

    /* everything from here on is excluded from the image digest */
    align8(&mut hdr);
    let digest = params.hash.hash(&[&hdr, payload]);
    append_tag(&mut hdr, params.hash.header_tag(), &digest);

    align8(&mut hdr);
    let signature = params.key.sign_digest(&digest)?;
    append_tag(&mut hdr, HDR_SIGNATURE, &signature);

    if let Some(secondary) = params.secondary {
        align8(&mut hdr);
        let signature = secondary.sign_digest(&digest)?;
        append_tag(&mut hdr, HDR_SECONDARY_SIGNATURE, &signature);
    }

    if let Some(policy) = &params.policy {
        align8(&mut hdr);
        let mut msg = Vec::with_capacity(4 + policy.policy_digest.len());
        LittleEndian::write_u32(&mut word, policy.pcr_mask);
        msg.extend_from_slice(&word);
        msg.extend_from_slice(&policy.policy_digest);
        let signed = params.hash.hash(&[&msg]);
        let signature = params.key.sign_digest(&signed)?;
        let mut tlv = Vec::with_capacity(4 + signature.len());
        tlv.extend_from_slice(&word);
        tlv.extend_from_slice(&signature);
        append_tag(&mut hdr, HDR_POLICY_SIGNATURE, &tlv);
    }

    if hdr.len() > params.header_size {
        return Err(ObSignerError::HeaderOverflow);
    }
    hdr.resize(params.header_size, HDR_PADDING);

    let mut image = hdr;
    image.extend_from_slice(payload);
    Ok(image)
}
