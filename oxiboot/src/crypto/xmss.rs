//! XMSS signature verification (RFC 8391, SHA-256 parameter sets).
//!
//! The keystore entry is `OID(4, BE) ‖ root(32) ‖ public seed(32)`; the
//! signature is `idx(4, BE) ‖ r(32) ‖ WOTS+ sig(67·32) ‖ auth path(h·32)`.
//! Only verification runs on the target; key state management belongs to
//! the signer. The XMSS-SHA2 family is pinned to SHA-256 regardless of
//! the manifest hash algorithm.

use sha2::{Digest, Sha256};

use crate::{OxibootError, Result};

const N: usize = 32;
const WOTS_W: u32 = 16;
const WOTS_LEN1: usize = 64;
const WOTS_LEN2: usize = 3;
const WOTS_LEN: usize = WOTS_LEN1 + WOTS_LEN2;

pub const XMSS_OID_SHA2_10_256: u32 = 0x0000_0001;
pub const XMSS_OID_SHA2_16_256: u32 = 0x0000_0002;
pub const XMSS_OID_SHA2_20_256: u32 = 0x0000_0003;

/* domain separators (RFC 8391 §5.1) */
const DOM_F: u8 = 0;
const DOM_H: u8 = 1;
const DOM_HMSG: u8 = 2;
const DOM_PRF: u8 = 3;

const ADRS_TYPE_OTS: u32 = 0;
const ADRS_TYPE_LTREE: u32 = 1;
const ADRS_TYPE_HASH_TREE: u32 = 2;

#[derive(Clone, Copy)]
struct Params {
    h: u32,
}

fn params_from_oid(oid: u32) -> Result<Params> {
    match oid {
        XMSS_OID_SHA2_10_256 => Ok(Params { h: 10 }),
        XMSS_OID_SHA2_16_256 => Ok(Params { h: 16 }),
        XMSS_OID_SHA2_20_256 => Ok(Params { h: 20 }),
        _ => Err(OxibootError::UnsupportedAlgorithm),
    }
}

/// Hash address structure: eight big-endian words.
#[derive(Clone, Copy, Default)]
struct Adrs {
    words: [u32; 8],
}

impl Adrs {
    fn new(adrs_type: u32) -> Self {
        let mut a = Adrs::default();
        a.words[3] = adrs_type;
        a
    }
    fn set_ots(&mut self, v: u32) {
        self.words[4] = v;
    }
    fn set_chain(&mut self, v: u32) {
        self.words[5] = v;
    }
    fn set_hash(&mut self, v: u32) {
        self.words[6] = v;
    }
    fn set_tree_height(&mut self, v: u32) {
        self.words[5] = v;
    }
    fn set_tree_index(&mut self, v: u32) {
        self.words[6] = v;
    }
    fn set_key_and_mask(&mut self, v: u32) {
        self.words[7] = v;
    }
    fn bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }
}

fn keyed_hash(domain: u8, key: &[u8], msg: &[u8]) -> [u8; N] {
    let mut pad = [0u8; N];
    pad[N - 1] = domain;
    let mut h = Sha256::new();
    h.update(pad);
    h.update(key);
    h.update(msg);
    h.finalize().into()
}

fn prf(seed: &[u8; N], adrs: &Adrs) -> [u8; N] {
    keyed_hash(DOM_PRF, seed, &adrs.bytes())
}

/// WOTS+ chaining function: apply `steps` iterations of F starting at
/// hash address `start`.
fn chain(x: &[u8; N], start: u32, steps: u32, seed: &[u8; N], adrs: &mut Adrs) -> [u8; N] {
    let mut tmp = *x;
    for j in start..start + steps {
        adrs.set_hash(j);
        adrs.set_key_and_mask(0);
        let key = prf(seed, adrs);
        adrs.set_key_and_mask(1);
        let bm = prf(seed, adrs);
        let mut masked = [0u8; N];
        for (m, (t, b)) in masked.iter_mut().zip(tmp.iter().zip(bm.iter())) {
            *m = t ^ b;
        }
        tmp = keyed_hash(DOM_F, &key, &masked);
    }
    tmp
}

/// Message digest split into base-16 digits plus the WOTS checksum.
fn msg_digits(msg_digest: &[u8; N]) -> [u8; WOTS_LEN] {
    let mut digits = [0u8; WOTS_LEN];
    for (i, byte) in msg_digest.iter().enumerate() {
        digits[2 * i] = byte >> 4;
        digits[2 * i + 1] = byte & 0x0F;
    }
    let mut csum: u32 = 0;
    for d in &digits[..WOTS_LEN1] {
        csum += WOTS_W - 1 - *d as u32;
    }
    // left-align the 12-bit checksum before re-running base_w
    csum <<= 4;
    let csum_bytes = [(csum >> 8) as u8, csum as u8];
    digits[WOTS_LEN1] = csum_bytes[0] >> 4;
    digits[WOTS_LEN1 + 1] = csum_bytes[0] & 0x0F;
    digits[WOTS_LEN1 + 2] = csum_bytes[1] >> 4;
    digits
}

fn wots_pk_from_sig(
    sig: &[u8],
    msg_digest: &[u8; N],
    seed: &[u8; N],
    ots_index: u32,
) -> [[u8; N]; WOTS_LEN] {
    let digits = msg_digits(msg_digest);
    let mut pk = [[0u8; N]; WOTS_LEN];
    let mut adrs = Adrs::new(ADRS_TYPE_OTS);
    adrs.set_ots(ots_index);
    for i in 0..WOTS_LEN {
        adrs.set_chain(i as u32);
        let part: &[u8; N] = sig[i * N..(i + 1) * N].try_into().unwrap();
        pk[i] = chain(part, digits[i] as u32, WOTS_W - 1 - digits[i] as u32, seed, &mut adrs);
    }
    pk
}

fn rand_hash(left: &[u8; N], right: &[u8; N], seed: &[u8; N], adrs: &mut Adrs) -> [u8; N] {
    adrs.set_key_and_mask(0);
    let key = prf(seed, adrs);
    adrs.set_key_and_mask(1);
    let bm0 = prf(seed, adrs);
    adrs.set_key_and_mask(2);
    let bm1 = prf(seed, adrs);
    let mut msg = [0u8; 2 * N];
    for i in 0..N {
        msg[i] = left[i] ^ bm0[i];
        msg[N + i] = right[i] ^ bm1[i];
    }
    keyed_hash(DOM_H, &key, &msg)
}

/// Compress the 67 WOTS+ public key values into one leaf.
fn ltree(pk: &mut [[u8; N]; WOTS_LEN], seed: &[u8; N], ltree_index: u32) -> [u8; N] {
    let mut adrs = Adrs::new(ADRS_TYPE_LTREE);
    adrs.set_ots(ltree_index);
    let mut len = WOTS_LEN;
    let mut height = 0u32;
    while len > 1 {
        adrs.set_tree_height(height);
        for i in 0..len / 2 {
            adrs.set_tree_index(i as u32);
            let (left, right) = (pk[2 * i], pk[2 * i + 1]);
            pk[i] = rand_hash(&left, &right, seed, &mut adrs);
        }
        if len & 1 == 1 {
            pk[len / 2] = pk[len - 1];
        }
        len = (len + 1) / 2;
        height += 1;
    }
    pk[0]
}

fn root_from_auth_path(
    leaf: &[u8; N],
    idx: u32,
    auth: &[u8],
    h: u32,
    seed: &[u8; N],
) -> [u8; N] {
    let mut node = *leaf;
    let mut adrs = Adrs::new(ADRS_TYPE_HASH_TREE);
    for k in 0..h {
        adrs.set_tree_height(k);
        adrs.set_tree_index(idx >> (k + 1));
        let sibling: &[u8; N] = auth[k as usize * N..(k as usize + 1) * N].try_into().unwrap();
        node = if (idx >> k) & 1 == 0 {
            rand_hash(&node, sibling, seed, &mut adrs)
        } else {
            rand_hash(sibling, &node, seed, &mut adrs)
        };
    }
    node
}

fn h_msg(r: &[u8; N], root: &[u8; N], idx: u32, message: &[u8]) -> [u8; N] {
    let mut key = [0u8; 3 * N];
    key[..N].copy_from_slice(r);
    key[N..2 * N].copy_from_slice(root);
    key[3 * N - 4..].copy_from_slice(&idx.to_be_bytes());
    keyed_hash(DOM_HMSG, &key, message)
}

fn verify_inner(
    params: Params,
    root: &[u8; N],
    seed: &[u8; N],
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let sig_len = 4 + N + WOTS_LEN * N + params.h as usize * N;
    if signature.len() != sig_len {
        return Err(OxibootError::SignatureInvalid);
    }
    let idx = u32::from_be_bytes(signature[..4].try_into().unwrap());
    if params.h < 32 && idx >= 1 << params.h {
        return Err(OxibootError::SignatureInvalid);
    }
    let r: &[u8; N] = signature[4..4 + N].try_into().unwrap();
    let ots_sig = &signature[4 + N..4 + N + WOTS_LEN * N];
    let auth = &signature[4 + N + WOTS_LEN * N..];

    let digest = h_msg(r, root, idx, message);
    let mut wots_pk = wots_pk_from_sig(ots_sig, &digest, seed, idx);
    let leaf = ltree(&mut wots_pk, seed, idx);
    let computed = root_from_auth_path(&leaf, idx, auth, params.h, seed);
    if &computed == root {
        Ok(())
    } else {
        Err(OxibootError::SignatureInvalid)
    }
}

/// Verifies an XMSS signature over `message` with a keystore public key.
pub fn verify(pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    if pubkey.len() != 4 + 2 * N {
        return Err(OxibootError::KeyImport);
    }
    let oid = u32::from_be_bytes(pubkey[..4].try_into().unwrap());
    let params = params_from_oid(oid)?;
    let root: &[u8; N] = pubkey[4..4 + N].try_into().unwrap();
    let seed: &[u8; N] = pubkey[4 + N..].try_into().unwrap();
    verify_inner(params, root, seed, message, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test-only signer over the same primitives. Tree height is a
    // parameter so the tests can run on a 4-leaf tree; verification
    // differs from the production sets only in the loop bound.

    fn wots_sk_chain(sk_seed: &[u8; N], ots_index: u32, chain_idx: u32) -> [u8; N] {
        let mut adrs = Adrs::new(ADRS_TYPE_OTS);
        adrs.set_ots(ots_index);
        adrs.set_chain(chain_idx);
        keyed_hash(4, sk_seed, &adrs.bytes())
    }

    fn wots_pk_for_leaf(sk_seed: &[u8; N], seed: &[u8; N], leaf: u32) -> [[u8; N]; WOTS_LEN] {
        let mut pk = [[0u8; N]; WOTS_LEN];
        let mut adrs = Adrs::new(ADRS_TYPE_OTS);
        adrs.set_ots(leaf);
        for i in 0..WOTS_LEN {
            adrs.set_chain(i as u32);
            let sk = wots_sk_chain(sk_seed, leaf, i as u32);
            pk[i] = chain(&sk, 0, WOTS_W - 1, seed, &mut adrs);
        }
        pk
    }

    fn leaf_value(sk_seed: &[u8; N], seed: &[u8; N], leaf: u32) -> [u8; N] {
        let mut pk = wots_pk_for_leaf(sk_seed, seed, leaf);
        ltree(&mut pk, seed, leaf)
    }

    struct TestKey {
        h: u32,
        sk_seed: [u8; N],
        seed: [u8; N],
        root: [u8; N],
        nodes: std::vec::Vec<std::vec::Vec<[u8; N]>>,
    }

    fn keygen(h: u32, sk_seed: [u8; N], seed: [u8; N]) -> TestKey {
        let leaves: std::vec::Vec<[u8; N]> = (0..1u32 << h)
            .map(|i| leaf_value(&sk_seed, &seed, i))
            .collect();
        let mut nodes = std::vec![leaves];
        for k in 0..h {
            let prev = &nodes[k as usize];
            let mut adrs = Adrs::new(ADRS_TYPE_HASH_TREE);
            adrs.set_tree_height(k);
            let level: std::vec::Vec<[u8; N]> = (0..prev.len() / 2)
                .map(|i| {
                    adrs.set_tree_index(i as u32);
                    rand_hash(&prev[2 * i], &prev[2 * i + 1], &seed, &mut adrs)
                })
                .collect();
            nodes.push(level);
        }
        let root = nodes[h as usize][0];
        TestKey {
            h,
            sk_seed,
            seed,
            root,
            nodes,
        }
    }

    fn sign(key: &TestKey, idx: u32, message: &[u8]) -> std::vec::Vec<u8> {
        let r = keyed_hash(5, &key.sk_seed, &idx.to_be_bytes());
        let digest = h_msg(&r, &key.root, idx, message);
        let digits = msg_digits(&digest);

        let mut sig = std::vec::Vec::new();
        sig.extend_from_slice(&idx.to_be_bytes());
        sig.extend_from_slice(&r);
        let mut adrs = Adrs::new(ADRS_TYPE_OTS);
        adrs.set_ots(idx);
        for i in 0..WOTS_LEN {
            adrs.set_chain(i as u32);
            let sk = wots_sk_chain(&key.sk_seed, idx, i as u32);
            let part = chain(&sk, 0, digits[i] as u32, &key.seed, &mut adrs);
            sig.extend_from_slice(&part);
        }
        for k in 0..key.h {
            let sibling = (idx >> k) ^ 1;
            sig.extend_from_slice(&key.nodes[k as usize][sibling as usize]);
        }
        sig
    }

    #[test]
    fn sign_verify_round_trip_all_leaves() {
        let key = keygen(2, [0x11; N], [0x22; N]);
        let msg = b"oxiboot xmss test image digest..";
        for idx in 0..4 {
            let sig = sign(&key, idx, msg);
            verify_inner(Params { h: 2 }, &key.root, &key.seed, msg, &sig).unwrap();
        }
    }

    #[test]
    fn tampered_signature_rejected() {
        let key = keygen(2, [0x33; N], [0x44; N]);
        let msg = [0xA5u8; 32];
        let mut sig = sign(&key, 1, &msg);
        sig[40] ^= 0x01;
        assert_eq!(
            verify_inner(Params { h: 2 }, &key.root, &key.seed, &msg, &sig),
            Err(OxibootError::SignatureInvalid)
        );
    }

    #[test]
    fn wrong_message_rejected() {
        let key = keygen(2, [0x55; N], [0x66; N]);
        let sig = sign(&key, 0, b"message one");
        assert_eq!(
            verify_inner(Params { h: 2 }, &key.root, &key.seed, b"message two", &sig),
            Err(OxibootError::SignatureInvalid)
        );
    }

    #[test]
    fn public_entry_checks_oid_and_sizes() {
        assert_eq!(verify(&[0u8; 10], b"m", &[0u8; 8]), Err(OxibootError::KeyImport));

        let mut pk = [0u8; 68];
        pk[3] = 0x7F; // unknown parameter set
        assert_eq!(
            verify(&pk, b"m", &[0u8; 2500]),
            Err(OxibootError::UnsupportedAlgorithm)
        );

        pk[3] = 0x01;
        // signature length must match h = 10 exactly
        assert_eq!(
            verify(&pk, b"m", &[0u8; 100]),
            Err(OxibootError::SignatureInvalid)
        );
    }

    #[test]
    fn checksum_digits_match_reference_shape() {
        // all-zero digest: 64 zero digits, csum = 64·15 = 960, <<4 = 15360
        let digits = msg_digits(&[0u8; N]);
        assert!(digits[..WOTS_LEN1].iter().all(|d| *d == 0));
        assert_eq!(&digits[WOTS_LEN1..], &[0x3, 0xC, 0x0]);
    }
}
