//! Shared rig for the update-engine scenarios: a simulated flash laid
//! out as BOOT/UPDATE/SWAP plus a key slot, obsigner-minted images and
//! a keystore built around freshly generated keys.

#![allow(dead_code)]

use obsigner::curve::{CurveType, SigningKeyType};
use obsigner::imgsigner::{sign_image, SignParams};
use obsigner::keygen::generate_key;

use oxiboot::constants::IMAGE_HEADER_SIZE;
use oxiboot::flashapi::PartitionLayout;
use oxiboot::keystore::{Keystore, KeystoreSlot};
use oxiboot::update::update_flash::FlashUpdater;
use oxiboot::update::UpdateInterface;

use oxiboot_hal::sim::SimFlash;

pub const SECTOR: usize = 0x1000;
pub const PART_SIZE: usize = 0x8000;
pub const BOOT_BASE: u32 = 0x0;
pub const UPDATE_BASE: u32 = 0x8000;
pub const SWAP_BASE: u32 = 0x10000;
pub const KEY_SLOT_BASE: u32 = 0x11000;
pub const FLASH_SIZE: usize = 0x12000;

/// `RUST_LOG=debug cargo test` narrates the engine's decisions.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn layout() -> PartitionLayout {
    PartitionLayout::new(BOOT_BASE, UPDATE_BASE, SWAP_BASE, PART_SIZE, SECTOR)
        .unwrap()
        .with_key_slot(KEY_SLOT_BASE)
}

pub fn fresh_flash() -> SimFlash {
    SimFlash::new(FLASH_SIZE, SECTOR)
}

/// Deterministic pseudo-payload; distinct per seed.
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}

pub fn new_key(curve: CurveType) -> SigningKeyType {
    generate_key(curve)
}

/// Keystore over `(key, part_id_mask)` pairs. Slot storage is leaked so
/// the borrow lives for the whole test run.
pub fn keystore_of(keys: &[(&SigningKeyType, u32)]) -> Keystore<'static> {
    let slots: Vec<KeystoreSlot<'static>> = keys
        .iter()
        .enumerate()
        .map(|(i, (key, mask))| KeystoreSlot {
            slot_id: i as u32,
            key_type: key.auth_type() as u32,
            part_id_mask: *mask,
            pubkey: Box::leak(key.pubkey_bytes().into_boxed_slice()),
        })
        .collect();
    Keystore::new(Box::leak(slots.into_boxed_slice()))
}

pub fn sign_app(key: &SigningKeyType, version: u32, payload: &[u8], part_id: u8) -> Vec<u8> {
    let mut params = SignParams::new(IMAGE_HEADER_SIZE, version, key);
    params.part_id = part_id;
    params.timestamp = 1_750_000_000 + version as u64;
    sign_image(payload, &params).unwrap()
}

pub fn stage_boot(flash: &SimFlash, image: &[u8]) {
    flash.load(BOOT_BASE, image);
}

pub fn stage_update(flash: &SimFlash, image: &[u8]) {
    flash.load(UPDATE_BASE, image);
}

pub fn updater<'a>(
    flash: &'a SimFlash,
    keystore: Keystore<'static>,
) -> FlashUpdater<'static, &'a SimFlash> {
    FlashUpdater::new(flash, layout(), keystore)
}

/// Arms the staged update, as the application's updater task would.
pub fn trigger_update(flash: &SimFlash, keystore: Keystore<'static>) {
    let u = updater(flash, keystore);
    (&u).update_trigger().unwrap();
}

/// One power-on: resolve states, swap if needed, verify BOOT.
pub fn boot_once(flash: &SimFlash, keystore: Keystore<'static>) -> oxiboot::Result<u32> {
    updater(flash, keystore).prepare_boot_image()
}

/// Marks the running image good, as the booted application would.
pub fn confirm_success(flash: &SimFlash, keystore: Keystore<'static>) {
    let u = updater(flash, keystore);
    (&u).update_success().unwrap();
}

pub fn boot_state(flash: &SimFlash) -> u8 {
    flash.dump(BOOT_BASE + PART_SIZE as u32 - 5, 1)[0]
}

pub fn update_state(flash: &SimFlash) -> u8 {
    flash.dump(UPDATE_BASE + PART_SIZE as u32 - 5, 1)[0]
}

/// Image area of a partition (everything but the trailer sector).
pub fn image_area(flash: &SimFlash, base: u32) -> Vec<u8> {
    flash.dump(base, PART_SIZE - SECTOR)
}

pub fn boot_payload(flash: &SimFlash, len: usize) -> Vec<u8> {
    flash.dump(BOOT_BASE + IMAGE_HEADER_SIZE as u32, len)
}

pub fn boot_version(flash: &SimFlash) -> u32 {
    let hdr = flash.dump(BOOT_BASE, IMAGE_HEADER_SIZE);
    oxiboot::parser::blob_version(&hdr).unwrap()
}
