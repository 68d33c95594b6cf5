//! Verification-pipeline scenarios: hybrid dual signatures, integrity
//! failures and malformed manifests, driven through the boot selector.

mod common;

use common::*;

use obsigner::curve::CurveType;
use obsigner::imgsigner::{sign_image, SignParams};

use oxiboot::constants::*;
use oxiboot::parser;

fn hybrid_image(
    primary: &obsigner::curve::SigningKeyType,
    secondary: &obsigner::curve::SigningKeyType,
    version: u32,
    payload_bytes: &[u8],
) -> Vec<u8> {
    let mut params = SignParams::new(IMAGE_HEADER_SIZE, version, primary);
    params.part_id = PART_ID_APP;
    params.timestamp = 1_750_000_000;
    params.secondary = Some(secondary);
    sign_image(payload_bytes, &params).unwrap()
}

#[test]
fn hybrid_image_boots_when_both_signatures_verify() {
    let primary = new_key(CurveType::Ed25519);
    let secondary = new_key(CurveType::NistP256);
    let ks = keystore_of(&[(&primary, KEY_VERIFY_ALL), (&secondary, KEY_VERIFY_ALL)]);
    let flash = fresh_flash();

    let pay = payload(41, 0x1300);
    let img = hybrid_image(&primary, &secondary, 1, &pay);
    let hdr = &img[..IMAGE_HEADER_SIZE];
    assert_eq!(
        parser::blob_type(hdr).unwrap() & HDR_IMG_TYPE_FEATURE_MASK,
        HDR_IMG_TYPE_HYBRID
    );
    parser::find_header(hdr, HDR_SECONDARY_CIPHER).unwrap();
    parser::find_header(hdr, HDR_SECONDARY_PUBKEY).unwrap();
    parser::find_header(hdr, HDR_SECONDARY_SIGNATURE).unwrap();

    stage_boot(&flash, &img);
    boot_once(&flash, ks).unwrap();
    assert_eq!(boot_version(&flash), 1);
}

#[test]
fn hybrid_image_fails_when_the_second_signature_is_bad() {
    let primary = new_key(CurveType::Ed25519);
    let secondary = new_key(CurveType::NistP256);
    let ks = keystore_of(&[(&primary, KEY_VERIFY_ALL), (&secondary, KEY_VERIFY_ALL)]);
    let flash = fresh_flash();

    let mut img = hybrid_image(&primary, &secondary, 1, &payload(42, 0x1300));
    let (off, _) =
        parser::find_header(&img[..IMAGE_HEADER_SIZE], HDR_SECONDARY_SIGNATURE).unwrap();
    img[off] ^= 0x01;

    stage_boot(&flash, &img);
    assert!(boot_once(&flash, ks).is_err());
}

#[test]
fn hybrid_image_fails_without_the_second_key_in_the_keystore() {
    let primary = new_key(CurveType::Ed25519);
    let secondary = new_key(CurveType::NistP256);
    // keystore only trusts the classical key
    let ks = keystore_of(&[(&primary, KEY_VERIFY_ALL)]);
    let flash = fresh_flash();

    let img = hybrid_image(&primary, &secondary, 1, &payload(43, 0x1300));
    stage_boot(&flash, &img);
    assert!(boot_once(&flash, ks).is_err());
}

#[test]
fn tampered_payload_fails_integrity() {
    let key = new_key(CurveType::Ed25519);
    let ks = keystore_of(&[(&key, KEY_VERIFY_ALL)]);
    let flash = fresh_flash();

    let img = sign_app(&key, 1, &payload(44, 0x1100), PART_ID_APP);
    stage_boot(&flash, &img);
    let addr = BOOT_BASE + IMAGE_HEADER_SIZE as u32 + 0x100;
    let byte = flash.dump(addr, 1)[0];
    flash.load(addr, &[byte ^ 0x10]);

    assert!(boot_once(&flash, ks).is_err());
}

#[test]
fn manifest_without_a_signature_is_malformed() {
    let key = new_key(CurveType::Ed25519);
    let ks = keystore_of(&[(&key, KEY_VERIFY_ALL)]);
    let flash = fresh_flash();

    let mut img = sign_app(&key, 1, &payload(45, 0x1100), PART_ID_APP);
    let (off, _) = parser::find_header(&img[..IMAGE_HEADER_SIZE], HDR_SIGNATURE).unwrap();
    // blank the tag: the scanner then runs into end-of-options
    img[off - 4] = 0x00;
    img[off - 3] = 0x00;

    stage_boot(&flash, &img);
    assert!(boot_once(&flash, ks).is_err());
}

#[test]
fn version_and_type_survive_the_round_trip_from_flash() {
    let key = new_key(CurveType::NistP256);
    let ks = keystore_of(&[(&key, KEY_VERIFY_ALL)]);
    let flash = fresh_flash();

    let img = sign_app(&key, 0x00A1_B2C3, &payload(46, 0x900), PART_ID_APP);
    stage_boot(&flash, &img);
    boot_once(&flash, ks).unwrap();

    let hdr = flash.dump(BOOT_BASE, IMAGE_HEADER_SIZE);
    assert_eq!(parser::blob_version(&hdr).unwrap(), 0x00A1_B2C3);
    let img_type = parser::blob_type(&hdr).unwrap();
    assert_eq!(img_type >> 8, AUTH_KEY_ECC256 as u16);
    assert_eq!(img_type & HDR_IMG_TYPE_PART_MASK, PART_ID_APP as u16);
    assert_eq!(parser::blob_timestamp(&hdr).unwrap(), 1_750_000_000 + 0x00A1_B2C3);
}
