use super::sealed::Sealed;
use crate::constants::*;
use crate::flashapi::{FlashApi, PartitionLayout};
use crate::parser;
use crate::{OxibootError, Result};

/// Partition/image states as read from the trailer.
pub enum States {
    New(StateNew),
    Updating(StateUpdating),
    Testing(StateTesting),
    Success(StateSuccess),
    NoState(NoState),
}

/// All valid partition states implement this [`Sealed`] trait.
pub trait TypeState: Sealed {
    fn as_byte(&self) -> Option<u8>;
}

/// States that may legally appear while an update is in flight.
///
/// - [`StateUpdating`] on the UPDATE partition arms the swap engine.
/// - [`StateTesting`] on the BOOT partition after a reboot means the
///   swapped image never confirmed itself and triggers a rollback.
pub trait Updateable: Sealed + TypeState {}

/// No image staged for boot or update; also what an erased trailer
/// decodes to.
#[derive(Debug)]
pub struct StateNew;
impl TypeState for StateNew {
    fn as_byte(&self) -> Option<u8> {
        Some(IMG_STATE_NEW)
    }
}

/// Only valid in the UPDATE partition: the staged image should replace
/// the one in BOOT at the next boot.
#[derive(Debug)]
pub struct StateUpdating;
impl TypeState for StateUpdating {
    fn as_byte(&self) -> Option<u8> {
        Some(IMG_STATE_UPDATING)
    }
}
impl Updateable for StateUpdating {}

/// Only valid in the BOOT partition: the image was just swapped in and
/// is pending its first confirmed boot.
#[derive(Debug)]
pub struct StateTesting;
impl TypeState for StateTesting {
    fn as_byte(&self) -> Option<u8> {
        Some(IMG_STATE_TESTING)
    }
}
impl Updateable for StateTesting {}

/// Only valid in the BOOT partition: the image has booted and confirmed
/// itself at least once.
#[derive(Debug)]
pub struct StateSuccess;
impl TypeState for StateSuccess {
    fn as_byte(&self) -> Option<u8> {
        Some(IMG_STATE_SUCCESS)
    }
}

/// The swap partition carries no state field and does not need one.
#[derive(Debug)]
pub struct NoState;
impl TypeState for NoState {
    fn as_byte(&self) -> Option<u8> {
        None
    }
}

/// All valid partitions implement `ValidPart`.
pub trait ValidPart: Sealed {
    fn part_id(&self) -> PartId;
}
/// Marker for the two partitions the swap engine exchanges.
pub trait Swappable: Sealed + ValidPart {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartId {
    PartBoot,
    PartUpdate,
    PartSwap,
}

/// A zero-sized struct to represent the `BOOT` partition.
#[derive(Debug, PartialEq, Eq)]
pub struct Boot;
impl Swappable for Boot {}
impl ValidPart for Boot {
    fn part_id(&self) -> PartId {
        PartId::PartBoot
    }
}

/// A zero-sized struct to represent the `UPDATE` partition.
#[derive(Debug, PartialEq, Eq)]
pub struct Update;
impl Swappable for Update {}
impl ValidPart for Update {
    fn part_id(&self) -> PartId {
        PartId::PartUpdate
    }
}

/// A zero-sized struct to represent the `SWAP` scratch sector.
#[derive(Debug, PartialEq, Eq)]
pub struct Swap;
impl ValidPart for Swap {
    fn part_id(&self) -> PartId {
        PartId::PartSwap
    }
}

/// Layout and cached manifest of one partition. All flash access goes
/// through a [`FlashApi`] object; the descriptor itself never holds a
/// device address.
#[derive(Debug)]
pub struct PartDescriptor<Part: ValidPart> {
    pub layout: PartitionLayout,
    pub hdr: Option<[u8; IMAGE_HEADER_SIZE]>,
    pub fw_size: usize,
    pub hdr_ok: bool,
    pub(crate) sha_ok: bool,
    pub(crate) signature_ok: bool,
    pub part: Part,
}

impl<Part: ValidPart> PartDescriptor<Part> {
    /// Descriptor with no header read yet; enough for trailer access.
    pub(crate) fn raw(part: Part, layout: PartitionLayout) -> Self {
        PartDescriptor {
            layout,
            hdr: None,
            fw_size: 0,
            hdr_ok: false,
            sha_ok: false,
            signature_ok: false,
            part,
        }
    }

    pub fn sector_size(&self) -> usize {
        self.layout.sector_size
    }

    pub fn sector_count(&self) -> usize {
        self.layout.sector_count()
    }
}

impl PartDescriptor<Boot> {
    /// Open the BOOT partition: read and validate the cached header,
    /// then classify the trailer state.
    pub fn open_partition(flash: impl FlashApi, layout: PartitionLayout) -> Result<ImageType> {
        let part_desc = Self::open_swappable(Boot, flash, layout)?;
        match part_desc.get_part_status(flash)? {
            States::New(state) => Ok(ImageType::BootInNewState(OxibootImage {
                part_desc,
                state: Some(state),
            })),
            States::Testing(state) => Ok(ImageType::BootInTestingState(OxibootImage {
                part_desc,
                state: Some(state),
            })),
            States::Success(state) => Ok(ImageType::BootInSuccessState(OxibootImage {
                part_desc,
                state: Some(state),
            })),
            _ => Err(OxibootError::InvalidState),
        }
    }
}

impl PartDescriptor<Update> {
    /// Open the UPDATE partition. Staged updates show up as
    /// [`ImageType::UpdateInUpdatingState`].
    pub fn open_partition(flash: impl FlashApi, layout: PartitionLayout) -> Result<ImageType> {
        let part_desc = Self::open_swappable(Update, flash, layout)?;
        match part_desc.get_part_status(flash)? {
            States::New(state) => Ok(ImageType::UpdateInNewState(OxibootImage {
                part_desc,
                state: Some(state),
            })),
            States::Updating(state) => Ok(ImageType::UpdateInUpdatingState(OxibootImage {
                part_desc,
                state: Some(state),
            })),
            _ => Err(OxibootError::InvalidState),
        }
    }
}

impl PartDescriptor<Swap> {
    /// Open the SWAP scratch region. It has no header and no trailer.
    pub fn open_partition(layout: PartitionLayout) -> Result<ImageType> {
        let mut part_desc = PartDescriptor::raw(Swap, layout);
        part_desc.fw_size = layout.sector_size;
        Ok(ImageType::NoStateSwap(OxibootImage {
            part_desc,
            state: None,
        }))
    }
}

impl<Part: ValidPart + Swappable> PartDescriptor<Part> {
    fn open_swappable(part: Part, flash: impl FlashApi, layout: PartitionLayout) -> Result<Self> {
        let mut part_desc = PartDescriptor::raw(part, layout);
        let mut hdr = [0u8; IMAGE_HEADER_SIZE];
        flash.flash_read(&part_desc, 0, &mut hdr)?;
        let size = parser::blob_size(&hdr)? as usize;
        if size > layout.partition_size - IMAGE_HEADER_SIZE {
            return Err(OxibootError::InvalidFirmwareSize);
        }
        part_desc.hdr = Some(hdr);
        part_desc.fw_size = size;
        part_desc.hdr_ok = true;
        Ok(part_desc)
    }

    /// Trailer state. A missing trailer magic reads as `New`: the magic
    /// is written by the bootloader alone and its presence marks a
    /// committed state.
    pub(crate) fn get_part_status(&self, flash: impl FlashApi) -> Result<States> {
        if self.get_partition_magic(flash)? != TRAILER_MAGIC {
            return Ok(States::New(StateNew));
        }
        let mut state = [0u8; PART_STATUS_LEN];
        flash.flash_trailer_read(self, 1, &mut state)?;
        match state[0] {
            IMG_STATE_NEW => Ok(States::New(StateNew)),
            IMG_STATE_UPDATING => Ok(States::Updating(StateUpdating)),
            IMG_STATE_TESTING => Ok(States::Testing(StateTesting)),
            IMG_STATE_SUCCESS => Ok(States::Success(StateSuccess)),
            _ => Err(OxibootError::StateInconsistent),
        }
    }

    /// Programs a state byte (and the trailer magic when absent). Only
    /// transitions that clear flash bits are legal here; anything else
    /// needs a trailer-sector erase first, which the update engine owns.
    pub fn set_state<State: TypeState>(&self, flash: impl FlashApi, state: &State) -> Result<()> {
        let new_state = state.as_byte().ok_or(OxibootError::InvalidState)?;
        if self.get_partition_magic(flash)? != TRAILER_MAGIC {
            self.set_partition_magic(flash)?;
        }
        let mut current = [0u8; PART_STATUS_LEN];
        flash.flash_trailer_read(self, 1, &mut current)?;
        if current[0] != new_state {
            flash.flash_trailer_write(self, 1, &[new_state])?;
        }
        Ok(())
    }

    pub(crate) fn get_partition_magic(&self, flash: impl FlashApi) -> Result<u32> {
        let mut magic = [0u8; MAGIC_TRAIL_LEN];
        flash.flash_trailer_read(self, 0, &mut magic)?;
        Ok(u32::from_le_bytes(magic))
    }

    pub(crate) fn set_partition_magic(&self, flash: impl FlashApi) -> Result<()> {
        flash.flash_trailer_write(self, 0, &TRAILER_MAGIC.to_le_bytes())
    }
}

impl PartDescriptor<Update> {
    /// Reads the progress nibble for `sector` from the flag array in the
    /// UPDATE trailer. Two flags pack into each byte, low nibble first.
    pub fn get_flags(&self, flash: impl FlashApi, sector: usize) -> Result<SectFlags> {
        if self.get_partition_magic(flash)? != TRAILER_MAGIC {
            return Err(OxibootError::StateInconsistent);
        }
        let pos = sector >> 1;
        let mut byte = [0u8; 1];
        flash.flash_trailer_read(self, 2 + pos, &mut byte)?;
        let nibble = if sector & 1 == 0 {
            byte[0] & 0x0F
        } else {
            (byte[0] >> 4) & 0x0F
        };
        match nibble {
            SECT_FLAG_NEW => Ok(SectFlags::NewFlag),
            SECT_FLAG_SWAPPING => Ok(SectFlags::SwappingFlag),
            SECT_FLAG_BACKUP => Ok(SectFlags::BackupFlag),
            SECT_FLAG_UPDATED => Ok(SectFlags::UpdatedFlag),
            _ => Err(OxibootError::InvalidSectFlag),
        }
    }

    /// Programs the progress nibble for `sector`, preserving its
    /// neighbor. Flag values are ordered so each transition only clears
    /// bits; the write is the commit point of a swap step.
    pub fn set_flags(&self, flash: impl FlashApi, sector: usize, flag: SectFlags) -> Result<()> {
        let nibble = flag.as_nibble().ok_or(OxibootError::InvalidSectFlag)?;
        if self.get_partition_magic(flash)? != TRAILER_MAGIC {
            return Err(OxibootError::StateInconsistent);
        }
        let pos = sector >> 1;
        let mut byte = [0u8; 1];
        flash.flash_trailer_read(self, 2 + pos, &mut byte)?;
        let merged = if sector & 1 == 0 {
            (byte[0] & 0xF0) | nibble
        } else {
            (nibble << 4) | (byte[0] & 0x0F)
        };
        if merged != byte[0] {
            flash.flash_trailer_write(self, 2 + pos, &[merged])?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SectFlags {
    NewFlag,
    SwappingFlag,
    BackupFlag,
    UpdatedFlag,
}

impl SectFlags {
    pub fn has_new_flag(&self) -> bool {
        self == &SectFlags::NewFlag
    }

    pub fn has_swapping_flag(&self) -> bool {
        self == &SectFlags::SwappingFlag
    }

    pub fn has_backup_flag(&self) -> bool {
        self == &SectFlags::BackupFlag
    }

    pub fn has_updated_flag(&self) -> bool {
        self == &SectFlags::UpdatedFlag
    }

    pub fn as_nibble(&self) -> Option<u8> {
        match self {
            SectFlags::NewFlag => Some(SECT_FLAG_NEW),
            SectFlags::SwappingFlag => Some(SECT_FLAG_SWAPPING),
            SectFlags::BackupFlag => Some(SECT_FLAG_BACKUP),
            SectFlags::UpdatedFlag => Some(SECT_FLAG_UPDATED),
        }
    }
}

/// An image bound to its partition and trailer state. The two type
/// parameters carry `partition` and `state`; transitions between states
/// consume the value.
#[derive(Debug)]
pub struct OxibootImage<Part: ValidPart, State: TypeState> {
    pub part_desc: PartDescriptor<Part>,
    pub(crate) state: Option<State>,
}

/// All legal `partition × state` combinations.
#[derive(Debug)]
pub enum ImageType {
    BootInNewState(OxibootImage<Boot, StateNew>),
    UpdateInNewState(OxibootImage<Update, StateNew>),
    NoStateSwap(OxibootImage<Swap, NoState>),
    UpdateInUpdatingState(OxibootImage<Update, StateUpdating>),
    BootInTestingState(OxibootImage<Boot, StateTesting>),
    BootInSuccessState(OxibootImage<Boot, StateSuccess>),
}

impl OxibootImage<Boot, StateNew> {
    pub fn into_testing_state(self) -> OxibootImage<Boot, StateTesting> {
        OxibootImage {
            part_desc: self.part_desc,
            state: Some(StateTesting),
        }
    }
}

impl OxibootImage<Boot, StateSuccess> {
    pub fn into_testing_state(self) -> OxibootImage<Boot, StateTesting> {
        OxibootImage {
            part_desc: self.part_desc,
            state: Some(StateTesting),
        }
    }
}

impl OxibootImage<Boot, StateTesting> {
    pub fn into_success_state(self) -> OxibootImage<Boot, StateSuccess> {
        OxibootImage {
            part_desc: self.part_desc,
            state: Some(StateSuccess),
        }
    }
}

impl OxibootImage<Update, StateNew> {
    pub fn into_updating_state(self) -> OxibootImage<Update, StateUpdating> {
        OxibootImage {
            part_desc: self.part_desc,
            state: Some(StateUpdating),
        }
    }
}

impl<Part: ValidPart + Swappable, State: TypeState> OxibootImage<Part, State> {
    pub fn hdr(&self) -> Result<&[u8]> {
        self.part_desc
            .hdr
            .as_ref()
            .map(|h| &h[..])
            .ok_or(OxibootError::MalformedImage)
    }

    pub fn get_firmware_version(&self) -> Result<u32> {
        parser::blob_version(self.hdr()?)
    }

    pub fn get_image_type(&self) -> Result<u16> {
        parser::blob_type(self.hdr()?)
    }

    pub fn get_diffbase_version(&self) -> Result<Option<u32>> {
        parser::blob_diffbase_version(self.hdr()?)
    }

    pub fn fw_size(&self) -> usize {
        self.part_desc.fw_size
    }

    /// Recomputes the image digest and compares it with the manifest's
    /// digest TLV.
    #[cfg(any(feature = "sha256", feature = "sha384", feature = "sha3-384"))]
    pub fn verify_integrity(&mut self, flash: impl FlashApi) -> Result<()> {
        let computed = compute_image_digest(&self.part_desc, flash)?;
        {
            let hdr = self.hdr()?;
            let (_, stored) =
                parser::find_header(hdr, HDR_HASH).map_err(|_| OxibootError::MalformedImage)?;
            if stored.len() != SHA_DIGEST_SIZE {
                return Err(OxibootError::InvalidHdrFieldLength);
            }
            if stored != computed.as_slice() {
                return Err(OxibootError::DigestMismatch);
            }
        }
        self.part_desc.sha_ok = true;
        Ok(())
    }

    /// Authenticates the manifest signature(s) against the keystore.
    ///
    /// The keystore slot must match the PUBKEY hint, carry the key type
    /// the IMG_TYPE auth byte names, and be authorized for the image's
    /// partition id. Hybrid images repeat the whole procedure for the
    /// secondary algorithm; both signatures must verify.
    #[cfg(any(feature = "sha256", feature = "sha384", feature = "sha3-384"))]
    pub fn verify_authenticity(
        &mut self,
        flash: impl FlashApi,
        keystore: &crate::keystore::Keystore,
    ) -> Result<()> {
        use crate::crypto::signatures::{verify_signature, SigAlg};

        let digest = compute_image_digest(&self.part_desc, flash)?;
        {
            let hdr = self.hdr()?;
            let img_type = parser::blob_type(hdr)?;
            let part_id = (img_type & HDR_IMG_TYPE_PART_MASK) as u8;

            let alg = SigAlg::from_img_type(img_type)?;
            let (_, hint) =
                parser::find_header(hdr, HDR_PUBKEY).map_err(|_| OxibootError::MalformedImage)?;
            if hint.len() != SHA_DIGEST_SIZE {
                return Err(OxibootError::InvalidHdrFieldLength);
            }
            let slot = keystore.lookup(hint, alg.key_type(), part_id)?;
            let (_, sig) = parser::find_header(hdr, HDR_SIGNATURE)
                .map_err(|_| OxibootError::MalformedImage)?;
            verify_signature(alg, slot.pubkey, &digest, sig)?;

            // the delta nibble (0xD) shares the hybrid bit, so compare
            // the whole feature nibble
            if img_type & HDR_IMG_TYPE_FEATURE_MASK == HDR_IMG_TYPE_HYBRID {
                let (_, cipher) = parser::find_header(hdr, HDR_SECONDARY_CIPHER)
                    .map_err(|_| OxibootError::MalformedImage)?;
                if cipher.len() != 2 {
                    return Err(OxibootError::InvalidHdrFieldLength);
                }
                let second = u16::from_le_bytes([cipher[0], cipher[1]]);
                let alg2 = SigAlg::from_img_type(second)?;
                let (_, hint2) = parser::find_header(hdr, HDR_SECONDARY_PUBKEY)
                    .map_err(|_| OxibootError::MalformedImage)?;
                let slot2 = keystore.lookup(hint2, alg2.key_type(), part_id)?;
                let (_, sig2) = parser::find_header(hdr, HDR_SECONDARY_SIGNATURE)
                    .map_err(|_| OxibootError::MalformedImage)?;
                verify_signature(alg2, slot2.pubkey, &digest, sig2)?;
            }
        }
        self.part_desc.signature_ok = true;
        Ok(())
    }
}

impl<Part: ValidPart + Swappable, State: Updateable> OxibootImage<Part, State> {
    pub fn get_state(&self) -> &State {
        self.state.as_ref().expect("updateable image carries a state")
    }
}

/// Digest over the manifest bytes preceding the digest TLV, then the
/// payload streamed from flash in [`SHA_BLOCK_SIZE`] chunks. The signer
/// appends the digest and signature TLVs after this boundary, so
/// signature bytes never enter the hash.
#[cfg(any(feature = "sha256", feature = "sha384", feature = "sha3-384"))]
pub fn compute_image_digest<Part: ValidPart>(
    part_desc: &PartDescriptor<Part>,
    flash: impl FlashApi,
) -> Result<crate::crypto::hash::ImageDigest> {
    use crate::crypto::hash::{finalize, ImageHasher};
    use sha2::Digest;

    let hdr = part_desc.hdr.as_ref().ok_or(OxibootError::MalformedImage)?;
    let (value_off, _) =
        parser::find_header(hdr, HDR_HASH).map_err(|_| OxibootError::MalformedImage)?;
    let hash_end = value_off - 4;

    let mut hasher = ImageHasher::new();
    let mut off = 0;
    while off < hash_end {
        let block = core::cmp::min(SHA_BLOCK_SIZE, hash_end - off);
        hasher.update(&hdr[off..off + block]);
        off += block;
    }

    let mut buf = [0u8; SHA_BLOCK_SIZE];
    let mut pos = 0;
    while pos < part_desc.fw_size {
        let block = core::cmp::min(SHA_BLOCK_SIZE, part_desc.fw_size - pos);
        flash.flash_read(part_desc, IMAGE_HEADER_SIZE + pos, &mut buf[..block])?;
        hasher.update(&buf[..block]);
        pos += block;
    }
    Ok(finalize(hasher))
}
