use crate::constants::*;
use crate::flashapi::{FlashApi, PartitionLayout};
use crate::image::image::*;
use crate::keystore::Keystore;
use crate::{OxibootError, Result};

use super::UpdateInterface;
use oxiboot_hal::FlashInterface;

#[cfg(any(
    feature = "encrypt-aes128",
    feature = "encrypt-aes256",
    feature = "encrypt-chacha"
))]
use super::encrypt::{self, EncryptKey};
#[cfg(any(
    feature = "encrypt-aes128",
    feature = "encrypt-aes256",
    feature = "encrypt-chacha"
))]
use core::cell::Cell;

#[cfg(any(
    feature = "encrypt-aes128",
    feature = "encrypt-aes256",
    feature = "encrypt-chacha"
))]
#[derive(Debug, Clone, Copy)]
enum KeyCache {
    Unknown,
    Absent,
    Loaded(EncryptKey),
}

/// Binds a flash driver, the partition geometry and the keystore into
/// the one object the boot path needs. All [`FlashApi`] traffic is
/// partition-relative; when update encryption is configured, UPDATE
/// partition contents are transformed on the way through.
#[derive(Debug)]
pub struct FlashUpdater<'a, Interface> {
    iface: Interface,
    layout: PartitionLayout,
    keystore: Keystore<'a>,
    #[cfg(any(
        feature = "encrypt-aes128",
        feature = "encrypt-aes256",
        feature = "encrypt-chacha"
    ))]
    enc_key: Cell<KeyCache>,
}

impl<'a, Interface> FlashUpdater<'a, Interface>
where
    Interface: FlashInterface,
{
    pub fn new(iface: Interface, layout: PartitionLayout, keystore: Keystore<'a>) -> Self {
        FlashUpdater {
            iface,
            layout,
            keystore,
            #[cfg(any(
                feature = "encrypt-aes128",
                feature = "encrypt-aes256",
                feature = "encrypt-chacha"
            ))]
            enc_key: Cell::new(KeyCache::Unknown),
        }
    }

    pub fn iface(&self) -> &Interface {
        &self.iface
    }

    pub fn layout(&self) -> PartitionLayout {
        self.layout
    }

    pub fn keystore(&self) -> &Keystore<'a> {
        &self.keystore
    }

    /// Installs the staged UPDATE image into BOOT through the three-way
    /// sector swap, resuming from the flag array after an interruption.
    /// On success BOOT is left in TESTING with the previous image parked
    /// in UPDATE as the rollback backup.
    ///
    /// `rollback` relaxes the version gate and accepts a BOOT partition
    /// already in TESTING (a rollback that was itself interrupted).
    pub fn oxiboot_update(&self, rollback: bool) -> Result<OxibootImage<Boot, StateTesting>> {
        self.flash_unlock();
        let result = self.run_update(rollback);
        self.flash_lock();
        result
    }

    fn run_update(&self, rollback: bool) -> Result<OxibootImage<Boot, StateTesting>> {
        let (boot_desc, boot_version) =
            match PartDescriptor::<Boot>::open_partition(self, self.layout) {
                Ok(ImageType::BootInNewState(img)) => {
                    let version = img.get_firmware_version().unwrap_or(0);
                    (img.part_desc, version)
                }
                Ok(ImageType::BootInSuccessState(img)) => {
                    let version = img.get_firmware_version().unwrap_or(0);
                    (img.part_desc, version)
                }
                Ok(ImageType::BootInTestingState(img)) if rollback => {
                    let version = img.get_firmware_version().unwrap_or(0);
                    (img.part_desc, version)
                }
                Ok(_) => return Err(OxibootError::InvalidState),
                // no readable image in BOOT: emergency install, nothing to preserve
                Err(_) => (PartDescriptor::raw(Boot, self.layout), 0),
            };

        let updt = match PartDescriptor::<Update>::open_partition(self, self.layout)? {
            ImageType::UpdateInUpdatingState(img) => img,
            _ => return Err(OxibootError::InvalidState),
        };
        let ImageType::NoStateSwap(swap_img) = PartDescriptor::<Swap>::open_partition(self.layout)?
        else {
            return Err(OxibootError::InvalidState);
        };
        let swap_desc = swap_img.part_desc;

        let img_type = updt.get_image_type()?;
        if img_type & HDR_IMG_TYPE_FEATURE_MASK == HDR_IMG_TYPE_DIFF {
            #[cfg(feature = "delta")]
            return self.delta_update(boot_desc, updt, swap_desc, boot_version, rollback);
            #[cfg(not(feature = "delta"))]
            return Err(OxibootError::UnsupportedAlgorithm);
        }

        self.swap_update(boot_desc, updt, swap_desc, boot_version, rollback)
    }

    fn swap_update(
        &self,
        boot_desc: PartDescriptor<Boot>,
        mut updt: OxibootImage<Update, StateUpdating>,
        swap_desc: PartDescriptor<Swap>,
        boot_version: u32,
        rollback: bool,
    ) -> Result<OxibootImage<Boot, StateTesting>> {
        let sector_size = self.layout.sector_size;

        /* Use the biggest of the two images for the swap */
        let mut total_size = boot_desc.fw_size + IMAGE_HEADER_SIZE;
        if updt.fw_size() + IMAGE_HEADER_SIZE > total_size {
            total_size = updt.fw_size() + IMAGE_HEADER_SIZE;
        }
        if total_size <= IMAGE_HEADER_SIZE {
            return Err(OxibootError::MalformedImage);
        }
        let image_sectors = total_size.div_ceil(sector_size);
        // the trailer sector is never part of the swap
        if image_sectors > self.layout.sector_count() - 1 {
            return Err(OxibootError::InvalidFirmwareSize);
        }

        // A fresh update (sector 0 untouched) is vetted before the first
        // erase; a resumed one was vetted on the boot that started it.
        let fresh = updt
            .part_desc
            .get_flags(self, 0)
            .map(|f| f.has_new_flag())
            .unwrap_or(true);
        if fresh {
            // a failed verification leaves the staged image armed: the
            // failure may be a transient read error, and re-vetting on
            // the next boot costs nothing before the first erase
            updt.verify_integrity(self)?;
            updt.verify_authenticity(self, &self.keystore)?;

            let img_type = updt.get_image_type()?;
            if img_type & HDR_IMG_TYPE_PART_MASK == PART_ID_BOOTLOADER as u16 {
                // bootloader self-update does not go through the swap
                warn!("refusing to swap a bootloader image");
                self.reset_update_trailer(&updt.part_desc)?;
                return Err(OxibootError::UpdateRejected);
            }
            let update_version = updt.get_firmware_version()?;
            if !rollback
                && !cfg!(feature = "allow-downgrade")
                && update_version <= boot_version
            {
                warn!(
                    "refusing downgrade: staged {} <= running {}",
                    update_version, boot_version
                );
                self.reset_update_trailer(&updt.part_desc)?;
                return Err(OxibootError::UpdateRejected);
            }
        }

        /* Interruptible swap. Progress lives in the UPDATE sector-flag
         * array; each flag write commits one step, so the loop resumes
         * wherever a power loss left it. */
        for sector in 0..image_sectors {
            let mut flag = updt
                .part_desc
                .get_flags(self, sector)
                .unwrap_or(SectFlags::NewFlag);
            if flag.has_new_flag() {
                self.copy_sector(&boot_desc, &swap_desc, sector)?;
                updt.part_desc.set_flags(self, sector, SectFlags::SwappingFlag)?;
                flag = SectFlags::SwappingFlag;
            }
            if flag.has_swapping_flag() {
                self.copy_sector(&updt.part_desc, &boot_desc, sector)?;
                updt.part_desc.set_flags(self, sector, SectFlags::BackupFlag)?;
                flag = SectFlags::BackupFlag;
            }
            if flag.has_backup_flag() {
                self.copy_sector(&swap_desc, &updt.part_desc, sector)?;
                updt.part_desc.set_flags(self, sector, SectFlags::UpdatedFlag)?;
            }
        }

        // Erase whatever the images did not cover, trailer sectors
        // included; UPDATE keeps the backup with a fresh NEW trailer and
        // BOOT re-enters the world as TESTING.
        let mut sector = image_sectors;
        while sector < self.layout.sector_count() {
            self.flash_erase(&boot_desc, sector * sector_size, sector_size)?;
            self.flash_erase(&updt.part_desc, sector * sector_size, sector_size)?;
            sector += 1;
        }
        self.flash_erase(&swap_desc, 0, sector_size)?;

        // disarm UPDATE before BOOT turns TESTING: losing power between
        // the two commits must never read as "rollback pending"
        updt.part_desc.set_partition_magic(self)?;
        let new_img = OxibootImage {
            part_desc: boot_desc,
            state: Some(StateTesting),
        };
        new_img.part_desc.set_state(self, new_img.get_state())?;

        info!("update installed, boot image now in testing state");
        Ok(new_img)
    }

    /// Sector copy through the flash buffer. Offsets into SWAP are
    /// always sector 0.
    pub(crate) fn copy_sector<Src: ValidPart, Dst: ValidPart>(
        &self,
        src_part: &PartDescriptor<Src>,
        dst_part: &PartDescriptor<Dst>,
        sector: usize,
    ) -> Result<()> {
        let sector_size = self.layout.sector_size;
        let mut src_offset = sector * sector_size;
        let mut dst_offset = sector * sector_size;
        if src_part.part.part_id() == PartId::PartSwap {
            src_offset = 0;
        }
        if dst_part.part.part_id() == PartId::PartSwap {
            dst_offset = 0;
        }

        self.flash_erase(dst_part, dst_offset, sector_size)?;
        let mut buf = [0u8; FLASHBUFFER_SIZE];
        let mut pos = 0;
        while pos < sector_size {
            // sector sizes need not be a multiple of the buffer
            let chunk = core::cmp::min(FLASHBUFFER_SIZE, sector_size - pos);
            self.flash_read(src_part, src_offset + pos, &mut buf[..chunk])?;
            self.flash_write(dst_part, dst_offset + pos, &buf[..chunk])?;
            pos += chunk;
        }
        Ok(())
    }

    /// Erase the UPDATE trailer sector and restamp the magic: state
    /// reads as NEW, the staged payload stays put.
    pub(crate) fn reset_update_trailer(&self, updt: &PartDescriptor<Update>) -> Result<()> {
        let trailer_offset = self.layout.partition_size - self.layout.sector_size;
        self.flash_erase(updt, trailer_offset, self.layout.sector_size)?;
        updt.set_partition_magic(self)
    }

    /// The boot-selector sequence: resume or run a pending update, roll
    /// back an unconfirmed TESTING image, authenticate BOOT and return
    /// its entry address. Falls back to the UPDATE backup when BOOT
    /// fails authentication; errors only when both images are bad.
    pub fn prepare_boot_image(&self) -> Result<u32> {
        let boot_state = PartDescriptor::<Boot>::open_partition(self, self.layout);
        let updt_state = PartDescriptor::<Update>::open_partition(self, self.layout);

        if matches!(&boot_state, Ok(ImageType::BootInTestingState(_))) {
            // second boot without confirmation: the update is considered
            // failed and the backup in UPDATE is restored
            info!("boot image still in testing state, rolling back");
            self.update_trigger()?;
            if let Err(e) = self.oxiboot_update(true) {
                warn!("rollback did not complete: {}", e);
            }
        } else if matches!(&updt_state, Ok(ImageType::UpdateInUpdatingState(_))) {
            match self.oxiboot_update(false) {
                Ok(_) => {}
                Err(e) => {
                    warn!("staged update not installed: {}", e);
                }
            }
        }

        match self.verify_boot() {
            Ok(addr) => Ok(addr),
            Err(e) => {
                // emergency path: BOOT does not authenticate, try the
                // image parked in UPDATE
                warn!("boot image rejected ({}), trying the backup", e);
                self.update_trigger()?;
                self.oxiboot_update(true)?;
                self.verify_boot()
            }
        }
    }

    /// Version of the firmware currently sitting in BOOT.
    pub fn current_firmware_version(&self) -> Result<u32> {
        match PartDescriptor::<Boot>::open_partition(self, self.layout)? {
            ImageType::BootInNewState(img) => img.get_firmware_version(),
            ImageType::BootInSuccessState(img) => img.get_firmware_version(),
            ImageType::BootInTestingState(img) => img.get_firmware_version(),
            _ => Err(OxibootError::InvalidState),
        }
    }

    /// Integrity and authenticity of the image sitting in BOOT.
    fn verify_boot(&self) -> Result<u32> {
        match PartDescriptor::<Boot>::open_partition(self, self.layout)? {
            ImageType::BootInNewState(mut img) => {
                img.verify_integrity(self)?;
                img.verify_authenticity(self, &self.keystore)?;
            }
            ImageType::BootInSuccessState(mut img) => {
                img.verify_integrity(self)?;
                img.verify_authenticity(self, &self.keystore)?;
            }
            ImageType::BootInTestingState(mut img) => {
                // first boot right after a swap
                img.verify_integrity(self)?;
                img.verify_authenticity(self, &self.keystore)?;
            }
            _ => return Err(OxibootError::InvalidState),
        }
        Ok(self.layout.boot_base + IMAGE_HEADER_SIZE as u32)
    }
}

/* update-partition encryption */

#[cfg(any(
    feature = "encrypt-aes128",
    feature = "encrypt-aes256",
    feature = "encrypt-chacha"
))]
impl<'a, Interface> FlashUpdater<'a, Interface>
where
    Interface: FlashInterface,
{
    /// Provision `key ‖ nonce` into the key slot sector. The writer is
    /// expected to pair every staged update with a fresh nonce.
    pub fn set_encrypt_key(
        &self,
        key: &[u8; ENCRYPT_KEY_SIZE],
        nonce: &[u8; ENCRYPT_NONCE_SIZE],
    ) -> Result<()> {
        let base = self.layout.key_slot_base.ok_or(OxibootError::InvalidState)?;
        let material = EncryptKey {
            key: *key,
            nonce: *nonce,
        };
        self.iface
            .hal_flash_erase(base, self.layout.sector_size)?;
        self.iface.hal_flash_write(base, &material.slot_bytes())?;
        self.enc_key.set(KeyCache::Loaded(material));
        Ok(())
    }

    pub fn get_encrypt_key(&self) -> Result<EncryptKey> {
        self.load_encrypt_key()?.ok_or(OxibootError::InvalidState)
    }

    pub fn erase_encrypt_key(&self) -> Result<()> {
        let base = self.layout.key_slot_base.ok_or(OxibootError::InvalidState)?;
        self.iface
            .hal_flash_erase(base, self.layout.sector_size)?;
        self.enc_key.set(KeyCache::Absent);
        Ok(())
    }

    fn load_encrypt_key(&self) -> Result<Option<EncryptKey>> {
        match self.enc_key.get() {
            KeyCache::Loaded(key) => Ok(Some(key)),
            KeyCache::Absent => Ok(None),
            KeyCache::Unknown => {
                let Some(base) = self.layout.key_slot_base else {
                    self.enc_key.set(KeyCache::Absent);
                    return Ok(None);
                };
                let mut raw = [0u8; ENCRYPT_KEY_SIZE + ENCRYPT_NONCE_SIZE];
                self.iface.hal_flash_read(base, &mut raw)?;
                if raw.iter().all(|b| *b == FLASH_BYTE_ERASED) {
                    self.enc_key.set(KeyCache::Absent);
                    Ok(None)
                } else {
                    let key = EncryptKey::from_slot_bytes(&raw);
                    self.enc_key.set(KeyCache::Loaded(key));
                    Ok(Some(key))
                }
            }
        }
    }

    fn transform_in_place(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        if let Some(key) = self.load_encrypt_key()? {
            encrypt::xcrypt(&key, offset, buf);
        }
        Ok(())
    }
}

impl<'a, 'b, Interface> FlashApi for &'b FlashUpdater<'a, Interface>
where
    Interface: FlashInterface,
{
    fn flash_read<Part: ValidPart>(
        self,
        part: &PartDescriptor<Part>,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        let addr = part.layout.part_base(part.part.part_id()) + offset as u32;
        self.iface.hal_flash_read(addr, buf)?;
        #[cfg(any(
            feature = "encrypt-aes128",
            feature = "encrypt-aes256",
            feature = "encrypt-chacha"
        ))]
        if part.part.part_id() == PartId::PartUpdate {
            self.transform_in_place(offset, buf)?;
        }
        Ok(())
    }

    fn flash_write<Part: ValidPart>(
        self,
        part: &PartDescriptor<Part>,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        let addr = part.layout.part_base(part.part.part_id()) + offset as u32;
        #[cfg(any(
            feature = "encrypt-aes128",
            feature = "encrypt-aes256",
            feature = "encrypt-chacha"
        ))]
        if part.part.part_id() == PartId::PartUpdate {
            let mut pos = 0;
            let mut chunk = [0u8; FLASHBUFFER_SIZE];
            while pos < data.len() {
                let len = core::cmp::min(FLASHBUFFER_SIZE, data.len() - pos);
                chunk[..len].copy_from_slice(&data[pos..pos + len]);
                self.transform_in_place(offset + pos, &mut chunk[..len])?;
                self.iface.hal_flash_write(addr + pos as u32, &chunk[..len])?;
                pos += len;
            }
            return Ok(());
        }
        self.iface.hal_flash_write(addr, data)?;
        Ok(())
    }

    fn flash_erase<Part: ValidPart>(
        self,
        part: &PartDescriptor<Part>,
        offset: usize,
        len: usize,
    ) -> Result<()> {
        let addr = part.layout.part_base(part.part.part_id()) + offset as u32;
        self.iface.hal_flash_erase(addr, len)?;
        Ok(())
    }

    fn flash_trailer_read<Part: ValidPart>(
        self,
        part: &PartDescriptor<Part>,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        let part_id = part.part.part_id();
        if part_id == PartId::PartSwap {
            return Err(OxibootError::InvalidState);
        }
        let addr = part.layout.trailer_end(part_id) - (MAGIC_TRAIL_LEN + offset) as u32;
        self.iface.hal_flash_read(addr, buf)?;
        Ok(())
    }

    fn flash_trailer_write<Part: ValidPart>(
        self,
        part: &PartDescriptor<Part>,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        let part_id = part.part.part_id();
        if part_id == PartId::PartSwap {
            return Err(OxibootError::InvalidState);
        }
        let addr = part.layout.trailer_end(part_id) - (MAGIC_TRAIL_LEN + offset) as u32;
        self.iface.hal_flash_write(addr, data)?;
        Ok(())
    }

    fn flash_unlock(self) {
        self.iface.hal_flash_unlock();
    }

    fn flash_lock(self) {
        self.iface.hal_flash_lock();
    }
}

impl<'a, 'b, Interface> UpdateInterface for &'b FlashUpdater<'a, Interface>
where
    Interface: FlashInterface,
{
    fn oxiboot_start(self) -> ! {
        self.iface.hal_init();
        match self.prepare_boot_image() {
            Ok(addr) => {
                self.iface.hal_prepare_boot();
                self.iface.boot_to(addr)
            }
            Err(e) => {
                error!("all boot options exhausted: {}", e);
                loop {
                    core::hint::spin_loop();
                }
            }
        }
    }

    fn update_trigger(self) -> Result<()> {
        let updt = PartDescriptor::raw(Update, self.layout);
        self.flash_unlock();
        let ret = updt.set_state(self, &StateUpdating);
        self.flash_lock();
        ret
    }

    fn update_success(self) -> Result<()> {
        let boot = PartDescriptor::raw(Boot, self.layout);
        self.flash_unlock();
        let ret = boot.set_state(self, &StateSuccess);
        self.flash_lock();
        ret
    }
}
