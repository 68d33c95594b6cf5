//! The table of trusted public keys baked into the bootloader. The
//! layout mirrors the keystore source file emitted by `obsigner keygen`:
//! one slot per key, each carrying a key-type tag and a partition-id
//! permission mask.

use crate::{OxibootError, Result};

/// One trusted key. `part_id_mask` bit `k` grants the key the right to
/// authorize images whose IMG_TYPE partition id is `k`;
/// [`crate::constants::KEY_VERIFY_ALL`] grants every partition.
#[derive(Debug, Clone, Copy)]
pub struct KeystoreSlot<'a> {
    pub slot_id: u32,
    pub key_type: u32,
    pub part_id_mask: u32,
    pub pubkey: &'a [u8],
}

impl<'a> KeystoreSlot<'a> {
    pub fn authorizes_partition(&self, part_id: u8) -> bool {
        part_id < 32 && (self.part_id_mask >> part_id) & 1 == 1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Keystore<'a> {
    slots: &'a [KeystoreSlot<'a>],
}

impl<'a> Keystore<'a> {
    pub const fn new(slots: &'a [KeystoreSlot<'a>]) -> Self {
        Keystore { slots }
    }

    pub fn num_keys(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, id: usize) -> Option<&KeystoreSlot<'a>> {
        self.slots.get(id)
    }

    /// Selects the slot whose public key hashes to the manifest's PUBKEY
    /// hint. A match only counts when the key type agrees with the
    /// signature algorithm from IMG_TYPE and the slot's permission mask
    /// covers the image's partition id; a key that merely hashes right
    /// is not an authorized key.
    #[cfg(any(feature = "sha256", feature = "sha384", feature = "sha3-384"))]
    pub fn lookup(
        &self,
        pubkey_hint: &[u8],
        key_type: u32,
        part_id: u8,
    ) -> Result<&KeystoreSlot<'a>> {
        use crate::crypto::hash::key_hash;

        for slot in self.slots {
            if slot.key_type != key_type {
                continue;
            }
            if key_hash(slot.pubkey).as_slice() != pubkey_hint {
                continue;
            }
            if !slot.authorizes_partition(part_id) {
                continue;
            }
            return Ok(slot);
        }
        Err(OxibootError::NoAuthorizedKey)
    }
}
