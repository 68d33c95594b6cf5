//! Delta (binary patch) updates. The staged image carries a forward
//! patch that rebuilds the new firmware from the contents of BOOT, and
//! an inverse patch that rebuilds the old firmware from the new one, so
//! a rollback needs no copy of the original update media.
//!
//! Patch container: `magic ‖ target_len:u32 ‖ commands`, commands being
//! `COPY(base_offset:u32, len:u32)`, `DATA(len:u32, bytes)` and `END`.
//! All integers little-endian. `COPY` offsets address the base image
//! from the start of its partition (manifest included) and must never
//! point below the output sector currently being built: sectors above
//! the cursor still hold base data, sectors below it have already been
//! replaced. The patch generator guarantees that by only emitting
//! matches at the output position itself.

use super::update_flash::FlashUpdater;
use crate::constants::*;
use crate::flashapi::FlashApi;
use crate::image::image::*;
use crate::parser;
use crate::{OxibootError, Result};

use oxiboot_hal::FlashInterface;

/// Sequential reader over the patch bytes staged in UPDATE. Reads go
/// through [`FlashApi`], so an encrypted-at-rest patch decrypts on the
/// way out.
struct PatchReader<'p, F: FlashApi> {
    flash: F,
    part: &'p PartDescriptor<Update>,
    pos: usize,
    end: usize,
}

impl<'p, F: FlashApi> PatchReader<'p, F> {
    fn new(flash: F, part: &'p PartDescriptor<Update>, start: usize, len: usize) -> Self {
        PatchReader {
            flash,
            part,
            pos: start,
            end: start + len,
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.pos + buf.len() > self.end {
            return Err(OxibootError::MalformedImage);
        }
        self.flash.flash_read(self.part, self.pos, buf)?;
        self.pos += buf.len();
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        if self.pos + len > self.end {
            return Err(OxibootError::MalformedImage);
        }
        self.pos += len;
        Ok(())
    }
}

/// Reads `magic ‖ target_len` off the front of a patch stream.
fn patch_target_len<F: FlashApi>(
    flash: F,
    updt: &PartDescriptor<Update>,
    patch_start: usize,
    patch_len: usize,
) -> Result<usize> {
    let mut rd = PatchReader::new(flash, updt, patch_start, patch_len);
    if rd.read_u32()? != DELTA_PATCH_MAGIC {
        return Err(OxibootError::MalformedImage);
    }
    Ok(rd.read_u32()? as usize)
}

/// Replays the patch from its start and writes the slice of output
/// falling into `sector` onto the (pre-erased) SWAP scratch. Replaying
/// from the top keeps the staging step a pure function of flash
/// contents, which is what makes it resumable.
fn stage_patch_sector<F: FlashApi>(
    flash: F,
    boot: &PartDescriptor<Boot>,
    updt: &PartDescriptor<Update>,
    swap: &PartDescriptor<Swap>,
    patch_start: usize,
    patch_len: usize,
    sector: usize,
    sector_size: usize,
) -> Result<()> {
    let win_start = sector * sector_size;
    let win_end = win_start + sector_size;

    let mut rd = PatchReader::new(flash, updt, patch_start, patch_len);
    if rd.read_u32()? != DELTA_PATCH_MAGIC {
        return Err(OxibootError::MalformedImage);
    }
    let target_len = rd.read_u32()? as usize;

    let mut out_pos = 0usize;
    loop {
        let op = rd.read_u8()?;
        match op {
            DELTA_OP_END => break,
            DELTA_OP_COPY => {
                let base_off = rd.read_u32()? as usize;
                let len = rd.read_u32()? as usize;
                let from = core::cmp::max(out_pos, win_start);
                let to = core::cmp::min(out_pos + len, win_end);
                if from < to {
                    let src = base_off + (from - out_pos);
                    if src < win_start {
                        // would read a base sector that is already replaced
                        return Err(OxibootError::InvalidValue);
                    }
                    copy_base_range(flash, boot, swap, src, from - win_start, to - from)?;
                }
                out_pos += len;
            }
            DELTA_OP_DATA => {
                let len = rd.read_u32()? as usize;
                let mut consumed = 0;
                let mut buf = [0u8; FLASHBUFFER_SIZE];
                while consumed < len {
                    let chunk = core::cmp::min(FLASHBUFFER_SIZE, len - consumed);
                    let pos = out_pos + consumed;
                    if pos + chunk <= win_start || pos >= win_end {
                        rd.skip(chunk)?;
                    } else {
                        rd.read_exact(&mut buf[..chunk])?;
                        let from = core::cmp::max(pos, win_start);
                        let to = core::cmp::min(pos + chunk, win_end);
                        flash.flash_write(swap, from - win_start, &buf[from - pos..to - pos])?;
                    }
                    consumed += chunk;
                }
                out_pos += len;
            }
            _ => return Err(OxibootError::MalformedImage),
        }
        if out_pos >= win_end {
            break;
        }
    }
    if out_pos < core::cmp::min(win_end, target_len) {
        return Err(OxibootError::MalformedImage);
    }
    Ok(())
}

/// Copies `len` bytes of still-unreplaced base image into the staging
/// window.
fn copy_base_range<F: FlashApi>(
    flash: F,
    boot: &PartDescriptor<Boot>,
    swap: &PartDescriptor<Swap>,
    src: usize,
    dst: usize,
    len: usize,
) -> Result<()> {
    let mut buf = [0u8; FLASHBUFFER_SIZE];
    let mut pos = 0;
    while pos < len {
        let chunk = core::cmp::min(FLASHBUFFER_SIZE, len - pos);
        flash.flash_read(boot, src + pos, &mut buf[..chunk])?;
        flash.flash_write(swap, dst + pos, &buf[..chunk])?;
        pos += chunk;
    }
    Ok(())
}

impl<'a, Interface> FlashUpdater<'a, Interface>
where
    Interface: FlashInterface,
{
    /// Delta flavor of the update: rebuild the target image sector by
    /// sector into SWAP, then move each sector into BOOT, tracking
    /// progress in the same flag array the full swap uses. UPDATE is
    /// left intact (bar a fresh trailer) because it still carries the
    /// inverse patch for rollback.
    pub(crate) fn delta_update(
        &self,
        boot_desc: PartDescriptor<Boot>,
        mut updt: OxibootImage<Update, StateUpdating>,
        swap_desc: PartDescriptor<Swap>,
        boot_version: u32,
        inverse: bool,
    ) -> Result<OxibootImage<Boot, StateTesting>> {
        let sector_size = self.layout().sector_size;

        let (patch_version, base_version, fwd_len, inv_off, inv_len, base_hash) = {
            let hdr = updt.hdr()?;
            let mut base_hash = [0u8; SHA_DIGEST_SIZE];
            let (_, stored) = parser::find_header(hdr, HDR_IMG_DELTA_BASE_HASH)
                .map_err(|_| OxibootError::MalformedImage)?;
            if stored.len() != SHA_DIGEST_SIZE {
                return Err(OxibootError::InvalidHdrFieldLength);
            }
            base_hash.copy_from_slice(stored);
            (
                parser::blob_version(hdr)?,
                parser::blob_u32_field(hdr, HDR_IMG_DELTA_BASE)?,
                parser::blob_u32_field(hdr, HDR_IMG_DELTA_SIZE)? as usize,
                parser::blob_u32_field(hdr, HDR_IMG_DELTA_INVERSE)? as usize,
                parser::blob_u32_field(hdr, HDR_IMG_DELTA_INVERSE_SIZE)? as usize,
                base_hash,
            )
        };

        let fresh = updt
            .part_desc
            .get_flags(self, 0)
            .map(|f| f.has_new_flag())
            .unwrap_or(true);
        if fresh {
            // verification failures leave the patch armed for a retry,
            // as in the full-swap path
            updt.verify_integrity(self)?;
            updt.verify_authenticity(self, self.keystore())?;

            if !inverse {
                let downgrade =
                    !cfg!(feature = "allow-downgrade") && patch_version <= boot_version;
                if boot_version != base_version || downgrade {
                    warn!(
                        "delta base mismatch: patch {} applies to {}, running {}",
                        patch_version, base_version, boot_version
                    );
                    self.reset_update_trailer(&updt.part_desc)?;
                    return Err(OxibootError::UpdateRejected);
                }
                // the patch must apply to exactly the image we have
                let hdr = boot_desc.hdr.as_ref().ok_or(OxibootError::MalformedImage)?;
                let (_, boot_digest) = parser::find_header(hdr, HDR_HASH)
                    .map_err(|_| OxibootError::MalformedImage)?;
                if boot_digest != base_hash {
                    warn!("delta base hash does not match the boot image");
                    self.reset_update_trailer(&updt.part_desc)?;
                    return Err(OxibootError::UpdateRejected);
                }
            }
        }

        let (patch_start, patch_len) = if inverse {
            (IMAGE_HEADER_SIZE + inv_off, inv_len)
        } else {
            (IMAGE_HEADER_SIZE, fwd_len)
        };
        if patch_len == 0 || patch_start + patch_len > IMAGE_HEADER_SIZE + updt.fw_size() {
            return Err(OxibootError::MalformedImage);
        }

        let target_len = patch_target_len(self, &updt.part_desc, patch_start, patch_len)?;
        let target_sectors = target_len.div_ceil(sector_size);
        if target_len <= IMAGE_HEADER_SIZE || target_sectors > self.layout().sector_count() - 1 {
            return Err(OxibootError::InvalidFirmwareSize);
        }

        for sector in 0..target_sectors {
            let mut flag = updt
                .part_desc
                .get_flags(self, sector)
                .unwrap_or(SectFlags::NewFlag);
            if flag.has_updated_flag() {
                continue;
            }
            if flag.has_new_flag() || flag.has_backup_flag() {
                self.flash_erase(&swap_desc, 0, sector_size)?;
                stage_patch_sector(
                    self,
                    &boot_desc,
                    &updt.part_desc,
                    &swap_desc,
                    patch_start,
                    patch_len,
                    sector,
                    sector_size,
                )?;
                updt.part_desc
                    .set_flags(self, sector, SectFlags::SwappingFlag)?;
                flag = SectFlags::SwappingFlag;
            }
            if flag.has_swapping_flag() {
                self.copy_sector(&swap_desc, &boot_desc, sector)?;
                updt.part_desc
                    .set_flags(self, sector, SectFlags::UpdatedFlag)?;
            }
        }

        for sector in target_sectors..self.layout().sector_count() {
            self.flash_erase(&boot_desc, sector * sector_size, sector_size)?;
        }
        self.flash_erase(&swap_desc, 0, sector_size)?;
        self.reset_update_trailer(&updt.part_desc)?;

        let new_img = OxibootImage {
            part_desc: boot_desc,
            state: Some(StateTesting),
        };
        new_img.part_desc.set_state(self, new_img.get_state())?;

        info!(
            "delta update applied: version {} reconstructed in boot",
            patch_version
        );
        Ok(new_img)
    }
}
