use byteorder::{ByteOrder, LittleEndian};
use nom::bytes::complete::{take, take_while};
use nom::error::Error;
use nom::number::complete::le_u16;

use crate::constants::*;
use crate::{OxibootError, Result};

/// Scans the manifest header for the first TLV carrying `tag` and returns
/// `(value_offset, value)`. `header` is the whole header region, starting
/// at the image magic.
///
/// Scan rules:
/// - a `0x0000` tag is an explicit end-of-options marker,
/// - `0xFF` bytes and bytes at odd offsets are padding and are skipped,
/// - a TLV whose length would cross the header region ends the scan.
///
/// Duplicate tags are not expected; the first occurrence wins.
pub fn find_header(header: &[u8], tag: u16) -> Result<(usize, &[u8])> {
    let total = header.len();
    let mut rem = header
        .get(IMAGE_HEADER_OFFSET..)
        .ok_or(OxibootError::MalformedImage)?;

    loop {
        let off = total - rem.len();
        if off + 4 >= total {
            break;
        }
        let (after_tag, htype) =
            le_u16::<_, Error<&[u8]>>(rem).map_err(|_| OxibootError::TlvNotFound)?;
        if htype == HDR_END {
            break;
        }
        if rem[0] == HDR_PADDING || off & 1 == 1 {
            let (skipped, _) = skip_padding(rem);
            rem = skipped;
            continue;
        }
        let (after_len, hlen) =
            le_u16::<_, Error<&[u8]>>(after_tag).map_err(|_| OxibootError::TlvNotFound)?;
        let hlen = hlen as usize;
        if 4 + hlen > total - IMAGE_HEADER_OFFSET {
            break;
        }
        if off + 4 + hlen > total {
            break;
        }
        let (after_val, value) =
            take::<_, _, Error<&[u8]>>(hlen)(after_len).map_err(|_| OxibootError::TlvNotFound)?;
        if htype == tag {
            return Ok((off + 4, value));
        }
        rem = after_val;
    }
    Err(OxibootError::TlvNotFound)
}

/// Consumes a run of padding bytes; at an odd offset a single non-pad
/// byte is skipped too, so half-word alignment is restored either way.
fn skip_padding(input: &[u8]) -> (&[u8], usize) {
    match take_while::<_, _, Error<&[u8]>>(|b| b == HDR_PADDING)(input) {
        Ok((rem, pad)) if !pad.is_empty() => (rem, pad.len()),
        _ => (&input[1..], 1),
    }
}

/// Checks the image magic and returns the payload size field.
pub fn blob_size(header: &[u8]) -> Result<u32> {
    if header.len() < IMAGE_HEADER_OFFSET {
        return Err(OxibootError::MalformedImage);
    }
    if LittleEndian::read_u32(header) != IMAGE_MAGIC {
        return Err(OxibootError::MalformedImage);
    }
    Ok(LittleEndian::read_u32(&header[4..]))
}

/// Firmware version from the VERSION TLV.
pub fn blob_version(header: &[u8]) -> Result<u32> {
    let (_, val) = find_header(header, HDR_VERSION)?;
    if val.len() != HDR_VERSION_LEN {
        return Err(OxibootError::InvalidHdrFieldLength);
    }
    Ok(LittleEndian::read_u32(val))
}

/// Build timestamp from the TIMESTAMP TLV.
pub fn blob_timestamp(header: &[u8]) -> Result<u64> {
    let (_, val) = find_header(header, HDR_TIMESTAMP)?;
    if val.len() != HDR_TIMESTAMP_LEN {
        return Err(OxibootError::InvalidHdrFieldLength);
    }
    Ok(LittleEndian::read_u64(val))
}

/// IMG_TYPE field: auth type, extra-feature bits, partition id.
pub fn blob_type(header: &[u8]) -> Result<u16> {
    let (_, val) = find_header(header, HDR_IMG_TYPE)?;
    if val.len() != HDR_IMG_TYPE_LEN {
        return Err(OxibootError::InvalidHdrFieldLength);
    }
    Ok(LittleEndian::read_u16(val))
}

pub fn blob_partition_id(header: &[u8]) -> Result<u8> {
    Ok((blob_type(header)? & HDR_IMG_TYPE_PART_MASK) as u8)
}

/// Base version a delta image applies to, `None` for full images.
pub fn blob_diffbase_version(header: &[u8]) -> Result<Option<u32>> {
    match find_header(header, HDR_IMG_DELTA_BASE) {
        Ok((_, val)) if val.len() == 4 => Ok(Some(LittleEndian::read_u32(val))),
        Ok(_) => Err(OxibootError::InvalidHdrFieldLength),
        Err(OxibootError::TlvNotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// u32 field helper for the remaining delta TLVs.
pub fn blob_u32_field(header: &[u8], tag: u16) -> Result<u32> {
    let (_, val) = find_header(header, tag)?;
    if val.len() != 4 {
        return Err(OxibootError::InvalidHdrFieldLength);
    }
    Ok(LittleEndian::read_u32(val))
}
