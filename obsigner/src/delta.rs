//! Delta patch generation. The command stream only references base
//! bytes at the output position itself, so `COPY(base_offset, _)` always
//! satisfies the bootloader's forward-reference rule: while sector `i`
//! of the target is being rebuilt, base sectors `>= i` are still intact.

use byteorder::{ByteOrder, LittleEndian};

use oxiboot::constants::{DELTA_OP_COPY, DELTA_OP_DATA, DELTA_OP_END, DELTA_PATCH_MAGIC};

use crate::{ObSignerError, Result};

/// Shorter same-offset matches are cheaper as literal data.
const MIN_COPY_RUN: usize = 16;

fn match_len_at(base: &[u8], target: &[u8], pos: usize) -> usize {
    let mut len = 0;
    while pos + len < target.len() && pos + len < base.len() && base[pos + len] == target[pos + len]
    {
        len += 1;
    }
    len
}

/// Builds a patch that rebuilds `target` when applied over `base`.
pub fn make_patch(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, DELTA_PATCH_MAGIC);
    out.extend_from_slice(&word);
    LittleEndian::write_u32(&mut word, target.len() as u32);
    out.extend_from_slice(&word);

    let mut pos = 0;
    while pos < target.len() {
        let run = match_len_at(base, target, pos);
        if run >= MIN_COPY_RUN {
            out.push(DELTA_OP_COPY);
            LittleEndian::write_u32(&mut word, pos as u32);
            out.extend_from_slice(&word);
            LittleEndian::write_u32(&mut word, run as u32);
            out.extend_from_slice(&word);
            pos += run;
        } else {
            let start = pos;
            pos += run.max(1);
            while pos < target.len() && match_len_at(base, target, pos) < MIN_COPY_RUN {
                pos += 1;
            }
            out.push(DELTA_OP_DATA);
            LittleEndian::write_u32(&mut word, (pos - start) as u32);
            out.extend_from_slice(&word);
            out.extend_from_slice(&target[start..pos]);
        }
    }
    out.push(DELTA_OP_END);
    out
}

/// Reference applier, used to verify a generated patch before it ships.
pub fn apply_patch(base: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    if patch.len() < 9 || LittleEndian::read_u32(&patch[..4]) != DELTA_PATCH_MAGIC {
        return Err(ObSignerError::BadParams("patch container magic"));
    }
    let target_len = LittleEndian::read_u32(&patch[4..8]) as usize;
    let mut out = Vec::with_capacity(target_len);
    let mut pos = 8;
    loop {
        let op = *patch
            .get(pos)
            .ok_or(ObSignerError::BadParams("patch truncated"))?;
        pos += 1;
        match op {
            DELTA_OP_END => break,
            DELTA_OP_COPY => {
                let base_off = LittleEndian::read_u32(&patch[pos..]) as usize;
                let len = LittleEndian::read_u32(&patch[pos + 4..]) as usize;
                pos += 8;
                out.extend_from_slice(&base[base_off..base_off + len]);
            }
            DELTA_OP_DATA => {
                let len = LittleEndian::read_u32(&patch[pos..]) as usize;
                pos += 4;
                out.extend_from_slice(&patch[pos..pos + len]);
                pos += len;
            }
            _ => return Err(ObSignerError::BadParams("patch opcode")),
        }
    }
    if out.len() != target_len {
        return Err(ObSignerError::BadParams("patch output length"));
    }
    Ok(out)
}
