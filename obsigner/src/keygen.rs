//! Key generation and keystore emission. The keystore is Rust source
//! compiled into the bootloader; each slot carries the key type and the
//! partition-id permission mask chosen at generation time.

use rand::rngs::OsRng;

use oxiboot::constants::KEY_VERIFY_ALL;

use crate::curve::{CurveType, SigningKeyType};

pub fn generate_key(curve: CurveType) -> SigningKeyType {
    match curve {
        CurveType::Ed25519 => {
            SigningKeyType::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
        }
        CurveType::NistP256 => SigningKeyType::NistP256(p256::ecdsa::SigningKey::random(&mut OsRng)),
    }
}

/// One slot of the keystore to emit.
pub struct KeystoreEntry {
    pub key_type: u8,
    pub part_id_mask: u32,
    pub pubkey: Vec<u8>,
}

impl KeystoreEntry {
    pub fn for_key(key: &SigningKeyType, part_id_mask: u32) -> Self {
        KeystoreEntry {
            key_type: key.auth_type(),
            part_id_mask,
            pubkey: key.pubkey_bytes(),
        }
    }

    pub fn trust_all(key: &SigningKeyType) -> Self {
        Self::for_key(key, KEY_VERIFY_ALL)
    }
}

fn byte_rows(bytes: &[u8]) -> String {
    let mut out = String::new();
    for row in bytes.chunks(12) {
        out.push_str("    ");
        for byte in row {
            out.push_str(&format!("0x{:02X}, ", byte));
        }
        out.pop();
        out.push('\n');
    }
    out
}

/// Emits the `keystore.rs` source file baked into the bootloader image.
pub fn keystore_source(entries: &[KeystoreEntry]) -> String {
    let mut out = String::new();
    out.push_str("/* Keystore file for oxiboot, automatically generated. Do not edit. */\n");
    out.push_str("/* This file is generated by obsigner keygen. */\n\n");
    out.push_str("use oxiboot::keystore::{Keystore, KeystoreSlot};\n\n");
    out.push_str(&format!("pub const NUM_PUBKEYS: usize = {};\n\n", entries.len()));

    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&format!(
            "static PUBKEY_{}: [u8; {}] = [\n{}];\n\n",
            i,
            entry.pubkey.len(),
            byte_rows(&entry.pubkey)
        ));
    }

    out.push_str("static SLOTS: [KeystoreSlot<'static>; NUM_PUBKEYS] = [\n");
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&format!(
            "    KeystoreSlot {{\n        slot_id: {},\n        key_type: {:#04x},\n        part_id_mask: {:#010x},\n        pubkey: &PUBKEY_{},\n    }},\n",
            i, entry.key_type, entry.part_id_mask, i
        ));
    }
    out.push_str("];\n\n");
    out.push_str("pub static KEYSTORE: Keystore<'static> = Keystore::new(&SLOTS);\n");
    out
}
