use std::env;
use std::fs;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use obsigner::curve::{import_signing_key, CurveType};
use obsigner::delta::{apply_patch, make_patch};
use obsigner::imgsigner::{sign_image, DeltaInfo, SignParams};
use obsigner::keygen::{generate_key, keystore_source, KeystoreEntry};

use oxiboot::parser;

const USAGE: &str = "\
usage:
  obsigner keygen <ed25519|ecc256> <key-out> <keystore-out> [mask-hex]
  obsigner sign <image.bin> <key-file> <ed25519|ecc256> <version> [header-size]
  obsigner delta <base-signed.bin> <target.bin> <key-file> <ed25519|ecc256> <version> [header-size]
";

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    if args.len() < 2 {
        eprint!("{}", USAGE);
        std::process::exit(1);
    }
    match args[1] {
        "keygen" => keygen_cmd(&args[2..]),
        "sign" => sign_cmd(&args[2..]),
        "delta" => delta_cmd(&args[2..]),
        _ => {
            eprint!("{}", USAGE);
            std::process::exit(1);
        }
    }
}

fn keygen_cmd(args: &[&str]) {
    let curve = CurveType::from_name(args[0]).expect("unknown curve");
    let mask = args
        .get(3)
        .map(|m| u32::from_str_radix(m.trim_start_matches("0x"), 16).expect("bad mask"))
        .unwrap_or(0xFFFF_FFFF);

    let key = generate_key(curve);
    let mut key_file = fs::File::create(args[1]).expect("cannot create key file");
    key_file
        .write_all(&key.secret_bytes())
        .expect("cannot write key file");

    let source = keystore_source(&[KeystoreEntry::for_key(&key, mask)]);
    fs::write(args[2], source).expect("cannot write keystore");
    println!(
        "generated {:?} key, mask {:#010x}: {} / {}",
        curve, mask, args[1], args[2]
    );
}

fn load_key(path: &str, curve: &str) -> obsigner::curve::SigningKeyType {
    let raw = fs::read(path).expect("cannot read key file");
    let curve = CurveType::from_name(curve).expect("unknown curve");
    import_signing_key(curve, &raw).expect("invalid signing key")
}

fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn sign_cmd(args: &[&str]) {
    let payload = fs::read(args[0]).expect("cannot read image");
    let key = load_key(args[1], args[2]);
    let version: u32 = args[3].parse().expect("bad version");
    let header_size: usize = args
        .get(4)
        .map(|s| s.parse().expect("bad header size"))
        .unwrap_or(256);

    let mut params = SignParams::new(header_size, version, &key);
    params.timestamp = timestamp_now();
    let image = sign_image(&payload, &params).expect("signing failed");

    let out = format!("{}_v{}_signed.bin", args[0].trim_end_matches(".bin"), version);
    fs::write(&out, &image).expect("cannot write signed image");
    println!("output image successfully created: {}", out);
}

fn delta_cmd(args: &[&str]) {
    let base_signed = fs::read(args[0]).expect("cannot read base image");
    let target_payload = fs::read(args[1]).expect("cannot read target image");
    let key = load_key(args[2], args[3]);
    let version: u32 = args[4].parse().expect("bad version");
    let header_size: usize = args
        .get(5)
        .map(|s| s.parse().expect("bad header size"))
        .unwrap_or(256);

    let base_hdr = &base_signed[..header_size];
    let base_version = parser::blob_version(base_hdr).expect("base image has no version");
    let (_, base_digest) =
        parser::find_header(base_hdr, oxiboot::constants::HDR_SHA256).expect("base has no digest");

    // sign the target the normal way first so the patch rebuilds a full
    // bootable image, manifest included
    let mut params = SignParams::new(header_size, version, &key);
    params.timestamp = timestamp_now();
    let target_signed = sign_image(&target_payload, &params).expect("signing failed");

    let fwd = make_patch(&base_signed, &target_signed);
    assert_eq!(
        apply_patch(&base_signed, &fwd).expect("forward patch is unsound"),
        target_signed
    );
    let inv = make_patch(&target_signed, &base_signed);
    log::debug!(
        "forward patch {} bytes, inverse patch {} bytes",
        fwd.len(),
        inv.len()
    );

    // inverse patch starts 8-byte aligned behind the forward patch
    let inv_offset = (fwd.len() + 7) & !7;
    let mut patch_payload = fwd;
    patch_payload.resize(inv_offset, 0xFF);
    let fwd_len = inv_offset as u32; /* container + alignment padding */
    patch_payload.extend_from_slice(&inv);

    let mut params = SignParams::new(header_size, version, &key);
    params.timestamp = timestamp_now();
    params.delta = Some(DeltaInfo {
        base_version,
        base_hash: base_digest.to_vec(),
        patch_len: fwd_len,
        inverse_offset: inv_offset as u32,
        inverse_len: inv.len() as u32,
    });
    let image = sign_image(&patch_payload, &params).expect("signing failed");

    let out = format!("{}_v{}_delta.bin", args[1].trim_end_matches(".bin"), version);
    fs::write(&out, &image).expect("cannot write delta image");
    println!(
        "delta image created: {} ({} byte patch against v{})",
        out,
        image.len(),
        base_version
    );
}
