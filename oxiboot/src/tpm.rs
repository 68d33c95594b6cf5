//! Measured boot and sealed secrets. The TPM device itself sits behind
//! [`TpmInterface`]; this module owns the boot-time policy: which PCR
//! receives the measurements, how the policy digest over a PCR selection
//! is formed, and the check that the manifest's POLICY_SIGNATURE TLV
//! authorizes an unseal with the same key that signed the image.

use oxiboot_hal::{TpmError, TpmInterface};

use crate::constants::*;
use crate::crypto::hash::{hash_all, ImageDigest};
use crate::crypto::signatures::{verify_signature, SigAlg};
use crate::image::image::{OxibootImage, Swappable, TypeState, ValidPart};
use crate::keystore::Keystore;
use crate::parser;
use crate::{OxibootError, Result};

/// NV index base for sealed blobs; a manifest names a slot relative to
/// this.
pub const TPM_SEAL_NV_BASE: u32 = 0x0140_0300;
/// Default measurement PCR: one of the debug/application PCRs so a
/// reboot cycle fully re-derives it.
pub const TPM_MEASURE_PCR: u8 = 16;

/// Owned TPM handle threaded through the boot pipeline. There is no
/// global device state; whoever drives the boot owns the context.
pub struct TpmContext<T: TpmInterface> {
    dev: T,
    pcr_index: u8,
}

impl<T: TpmInterface> TpmContext<T> {
    pub fn new(dev: T) -> Self {
        TpmContext {
            dev,
            pcr_index: TPM_MEASURE_PCR,
        }
    }

    pub fn with_pcr(dev: T, pcr_index: u8) -> Self {
        TpmContext { dev, pcr_index }
    }

    pub fn device(&mut self) -> &mut T {
        &mut self.dev
    }

    pub fn pcr_index(&self) -> u8 {
        self.pcr_index
    }

    /// First measurement: the bootloader's own digest.
    pub fn measure_bootloader(&mut self, digest: &ImageDigest) -> Result<()> {
        self.dev
            .pcr_extend(self.pcr_index, digest)
            .map_err(map_tpm_err)
    }

    /// Second measurement: the digest of the image about to boot.
    pub fn measure_image(&mut self, digest: &ImageDigest) -> Result<()> {
        self.dev
            .pcr_extend(self.pcr_index, digest)
            .map_err(map_tpm_err)
    }

    /// Policy digest over a PCR selection: hash the selected PCR values
    /// in ascending index order, then bind the mask itself so that two
    /// selections with equal contents cannot stand in for each other.
    pub fn policy_digest(&mut self, pcr_mask: u32) -> Result<ImageDigest> {
        use sha2::Digest;

        let mut inner = crate::crypto::hash::ImageHasher::new();
        let mut buf = [0u8; 64];
        for pcr in 0..32u8 {
            if (pcr_mask >> pcr) & 1 == 0 {
                continue;
            }
            let n = self.dev.pcr_read(pcr, &mut buf).map_err(map_tpm_err)?;
            inner.update(&buf[..n]);
        }
        let pcrs_digest = crate::crypto::hash::finalize(inner);

        let mut msg = [0u8; 4 + SHA_DIGEST_SIZE];
        msg[..4].copy_from_slice(&pcr_mask.to_le_bytes());
        msg[4..].copy_from_slice(&pcrs_digest);
        Ok(hash_all(&msg))
    }

    /// Releases the secret sealed at `TPM_SEAL_NV_BASE + nv_slot`.
    ///
    /// The manifest's POLICY_SIGNATURE TLV is `pcr_mask:u32 ‖ signature`
    /// where the signature covers `pcr_mask ‖ policy_digest(pcr_mask)`
    /// and must verify against the keystore slot that authorized the
    /// image itself. Unsealing then still requires the device to agree
    /// that current PCRs satisfy the sealing policy.
    pub fn unseal_secret<Part, State>(
        &mut self,
        img: &OxibootImage<Part, State>,
        keystore: &Keystore,
        nv_slot: u32,
        out: &mut [u8],
    ) -> Result<usize>
    where
        Part: ValidPart + Swappable,
        State: TypeState,
    {
        let hdr = img.hdr()?;
        let (_, policy) = parser::find_header(hdr, HDR_POLICY_SIGNATURE)
            .map_err(|_| OxibootError::MalformedImage)?;
        if policy.len() <= 4 {
            return Err(OxibootError::InvalidHdrFieldLength);
        }
        let pcr_mask = u32::from_le_bytes(policy[..4].try_into().unwrap());
        let signature = &policy[4..];

        let policy_digest = self.policy_digest(pcr_mask)?;
        let mut msg = [0u8; 4 + SHA_DIGEST_SIZE];
        msg[..4].copy_from_slice(&pcr_mask.to_le_bytes());
        msg[4..].copy_from_slice(&policy_digest);
        let signed = hash_all(&msg);

        let img_type = parser::blob_type(hdr)?;
        let part_id = (img_type & HDR_IMG_TYPE_PART_MASK) as u8;
        let alg = SigAlg::from_img_type(img_type)?;
        let (_, hint) =
            parser::find_header(hdr, HDR_PUBKEY).map_err(|_| OxibootError::MalformedImage)?;
        let slot = keystore.lookup(hint, alg.key_type(), part_id)?;
        verify_signature(alg, slot.pubkey, &signed, signature)?;

        self.dev
            .nv_unseal(TPM_SEAL_NV_BASE + nv_slot, &policy_digest, out)
            .map_err(map_tpm_err)
    }
}

fn map_tpm_err(e: TpmError) -> OxibootError {
    match e {
        TpmError::PolicyMismatch => OxibootError::SignatureInvalid,
        TpmError::NotFound => OxibootError::InvalidValue,
        TpmError::Io | TpmError::BufferTooSmall => OxibootError::FlashIo,
    }
}
