//! Signature verification, dispatched on the auth-type byte of the
//! manifest's IMG_TYPE field. Every verifier takes the image digest as
//! the signed message and answers with a hard pass/fail; key and
//! signature material arrives as raw keystore/manifest bytes.

use crate::constants::*;
use crate::{OxibootError, Result};

/// The signature algorithms an image may be signed with. Which arms of
/// the dispatcher are actually compiled in is controlled by the
/// corresponding Cargo features; a manifest naming an absent algorithm
/// fails verification with `UnsupportedAlgorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigAlg {
    Ed25519,
    Ed448,
    Ecc256,
    Ecc384,
    Ecc521,
    Rsa2048,
    Rsa3072,
    Rsa4096,
    Lms,
    Xmss,
    MlDsa,
}

impl SigAlg {
    pub fn from_auth_type(auth: u8) -> Result<Self> {
        match auth {
            AUTH_KEY_ED25519 => Ok(SigAlg::Ed25519),
            AUTH_KEY_ECC256 => Ok(SigAlg::Ecc256),
            AUTH_KEY_RSA2048 => Ok(SigAlg::Rsa2048),
            AUTH_KEY_RSA4096 => Ok(SigAlg::Rsa4096),
            AUTH_KEY_ED448 => Ok(SigAlg::Ed448),
            AUTH_KEY_ECC384 => Ok(SigAlg::Ecc384),
            AUTH_KEY_ECC521 => Ok(SigAlg::Ecc521),
            AUTH_KEY_RSA3072 => Ok(SigAlg::Rsa3072),
            AUTH_KEY_LMS => Ok(SigAlg::Lms),
            AUTH_KEY_XMSS => Ok(SigAlg::Xmss),
            AUTH_KEY_ML_DSA => Ok(SigAlg::MlDsa),
            _ => Err(OxibootError::UnsupportedAlgorithm),
        }
    }

    /// Algorithm from an IMG_TYPE field (auth type lives in the high
    /// byte). The SECONDARY_CIPHER TLV of hybrid manifests uses the same
    /// encoding.
    pub fn from_img_type(img_type: u16) -> Result<Self> {
        Self::from_auth_type((img_type >> 8) as u8)
    }

    /// The keystore `key_type` tag this algorithm's keys carry.
    pub fn key_type(self) -> u32 {
        let auth = match self {
            SigAlg::Ed25519 => AUTH_KEY_ED25519,
            SigAlg::Ecc256 => AUTH_KEY_ECC256,
            SigAlg::Rsa2048 => AUTH_KEY_RSA2048,
            SigAlg::Rsa4096 => AUTH_KEY_RSA4096,
            SigAlg::Ed448 => AUTH_KEY_ED448,
            SigAlg::Ecc384 => AUTH_KEY_ECC384,
            SigAlg::Ecc521 => AUTH_KEY_ECC521,
            SigAlg::Rsa3072 => AUTH_KEY_RSA3072,
            SigAlg::Lms => AUTH_KEY_LMS,
            SigAlg::Xmss => AUTH_KEY_XMSS,
            SigAlg::MlDsa => AUTH_KEY_ML_DSA,
        };
        auth as u32
    }

    /// Raw public key size as stored in the keystore.
    pub fn pubkey_size(self) -> usize {
        match self {
            SigAlg::Ed25519 => KEYSTORE_PUBKEY_SIZE_ED25519,
            SigAlg::Ed448 => KEYSTORE_PUBKEY_SIZE_ED448,
            SigAlg::Ecc256 => KEYSTORE_PUBKEY_SIZE_ECC256,
            SigAlg::Ecc384 => KEYSTORE_PUBKEY_SIZE_ECC384,
            SigAlg::Ecc521 => KEYSTORE_PUBKEY_SIZE_ECC521,
            SigAlg::Rsa2048 => KEYSTORE_PUBKEY_SIZE_RSA2048,
            SigAlg::Rsa3072 => KEYSTORE_PUBKEY_SIZE_RSA3072,
            SigAlg::Rsa4096 => KEYSTORE_PUBKEY_SIZE_RSA4096,
            SigAlg::Lms => KEYSTORE_PUBKEY_SIZE_LMS,
            SigAlg::Xmss => KEYSTORE_PUBKEY_SIZE_XMSS,
            SigAlg::MlDsa => KEYSTORE_PUBKEY_SIZE_ML_DSA,
        }
    }
}

/// Verifies `signature` over `digest` with the given raw public key.
///
/// ECDSA signatures are raw `r ‖ s`, each zero-padded to the curve size.
/// RSA is PKCS#1 v1.5; both the bare-digest and the ASN.1
/// DigestInfo-wrapped encodings are accepted.
pub fn verify_signature(
    alg: SigAlg,
    pubkey: &[u8],
    digest: &[u8],
    signature: &[u8],
) -> Result<()> {
    match alg {
        #[cfg(feature = "ed25519")]
        SigAlg::Ed25519 => verify_ed25519(pubkey, digest, signature),
        #[cfg(feature = "ed448")]
        SigAlg::Ed448 => verify_ed448(pubkey, digest, signature),
        #[cfg(feature = "nistp256")]
        SigAlg::Ecc256 => verify_ecc256(pubkey, digest, signature),
        #[cfg(feature = "nistp384")]
        SigAlg::Ecc384 => verify_ecc384(pubkey, digest, signature),
        #[cfg(feature = "nistp521")]
        SigAlg::Ecc521 => verify_ecc521(pubkey, digest, signature),
        #[cfg(any(feature = "rsa2048", feature = "rsa3072", feature = "rsa4096"))]
        SigAlg::Rsa2048 | SigAlg::Rsa3072 | SigAlg::Rsa4096 => {
            verify_rsa(alg, pubkey, digest, signature)
        }
        #[cfg(feature = "lms")]
        SigAlg::Lms => verify_lms(pubkey, digest, signature),
        #[cfg(feature = "xmss")]
        SigAlg::Xmss => super::xmss::verify(pubkey, digest, signature),
        #[cfg(feature = "ml-dsa")]
        SigAlg::MlDsa => verify_ml_dsa(pubkey, digest, signature),
        #[allow(unreachable_patterns)]
        _ => Err(OxibootError::UnsupportedAlgorithm),
    }
}

#[cfg(feature = "ed25519")]
fn verify_ed25519(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    use ed25519_dalek::{Signature, VerifyingKey};
    use signature::Verifier;

    let pk: &[u8; KEYSTORE_PUBKEY_SIZE_ED25519] =
        pubkey.try_into().map_err(|_| OxibootError::KeyImport)?;
    let vk = VerifyingKey::from_bytes(pk).map_err(|_| OxibootError::KeyImport)?;
    let sig = Signature::from_slice(signature).map_err(|_| OxibootError::SignatureInvalid)?;
    vk.verify(digest, &sig)
        .map_err(|_| OxibootError::SignatureInvalid)
}

#[cfg(feature = "ed448")]
fn verify_ed448(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    use ed448_goldilocks::{Signature, VerifyingKey};
    use signature::Verifier;

    let vk = VerifyingKey::try_from(pubkey).map_err(|_| OxibootError::KeyImport)?;
    let sig = Signature::try_from(signature).map_err(|_| OxibootError::SignatureInvalid)?;
    vk.verify(digest, &sig)
        .map_err(|_| OxibootError::SignatureInvalid)
}

#[cfg(feature = "nistp256")]
fn verify_ecc256(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    use p256::ecdsa::signature::hazmat::PrehashVerifier;
    use p256::ecdsa::{Signature, VerifyingKey};
    use p256::elliptic_curve::generic_array::GenericArray;
    use p256::EncodedPoint;

    if pubkey.len() != KEYSTORE_PUBKEY_SIZE_ECC256 {
        return Err(OxibootError::KeyImport);
    }
    // `from_encoded_point` is fallible: it checks the point is on the curve.
    let point = EncodedPoint::from_untagged_bytes(GenericArray::from_slice(pubkey));
    let vk = VerifyingKey::from_encoded_point(&point).map_err(|_| OxibootError::KeyImport)?;
    let sig = Signature::from_slice(signature).map_err(|_| OxibootError::SignatureInvalid)?;
    vk.verify_prehash(digest, &sig)
        .map_err(|_| OxibootError::SignatureInvalid)
}

#[cfg(feature = "nistp384")]
fn verify_ecc384(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    use p384::ecdsa::signature::hazmat::PrehashVerifier;
    use p384::ecdsa::{Signature, VerifyingKey};
    use p384::elliptic_curve::generic_array::GenericArray;
    use p384::EncodedPoint;

    if pubkey.len() != KEYSTORE_PUBKEY_SIZE_ECC384 {
        return Err(OxibootError::KeyImport);
    }
    let point = EncodedPoint::from_untagged_bytes(GenericArray::from_slice(pubkey));
    let vk = VerifyingKey::from_encoded_point(&point).map_err(|_| OxibootError::KeyImport)?;
    let sig = Signature::from_slice(signature).map_err(|_| OxibootError::SignatureInvalid)?;
    vk.verify_prehash(digest, &sig)
        .map_err(|_| OxibootError::SignatureInvalid)
}

#[cfg(feature = "nistp521")]
fn verify_ecc521(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    use p521::ecdsa::signature::hazmat::PrehashVerifier;
    use p521::ecdsa::{Signature, VerifyingKey};
    use p521::elliptic_curve::generic_array::GenericArray;
    use p521::EncodedPoint;

    if pubkey.len() != KEYSTORE_PUBKEY_SIZE_ECC521 {
        return Err(OxibootError::KeyImport);
    }
    let point = EncodedPoint::from_untagged_bytes(GenericArray::from_slice(pubkey));
    let vk = VerifyingKey::from_encoded_point(&point).map_err(|_| OxibootError::KeyImport)?;
    let sig = Signature::from_slice(signature).map_err(|_| OxibootError::SignatureInvalid)?;
    vk.verify_prehash(digest, &sig)
        .map_err(|_| OxibootError::SignatureInvalid)
}

#[cfg(any(feature = "rsa2048", feature = "rsa3072", feature = "rsa4096"))]
fn verify_rsa(alg: SigAlg, pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    use rsa::pkcs1::DecodeRsaPublicKey;
    use rsa::{Pkcs1v15Sign, RsaPublicKey};

    let key = RsaPublicKey::from_pkcs1_der(pubkey).map_err(|_| OxibootError::KeyImport)?;
    let modulus_bytes = match alg {
        SigAlg::Rsa2048 => 256,
        SigAlg::Rsa3072 => 384,
        _ => 512,
    };
    if key.size() != modulus_bytes {
        return Err(OxibootError::KeyImport);
    }
    if key
        .verify(Pkcs1v15Sign::new_unprefixed(), digest, signature)
        .is_ok()
    {
        return Ok(());
    }
    #[cfg(any(feature = "sha256", feature = "sha384"))]
    {
        let scheme = {
            #[cfg(feature = "sha256")]
            {
                Pkcs1v15Sign::new::<sha2::Sha256>()
            }
            #[cfg(feature = "sha384")]
            {
                Pkcs1v15Sign::new::<sha2::Sha384>()
            }
        };
        if key.verify(scheme, digest, signature).is_ok() {
            return Ok(());
        }
    }
    Err(OxibootError::SignatureInvalid)
}

#[cfg(feature = "lms")]
fn verify_lms(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    hbs_lms::verify::<hbs_lms::Sha256_256>(digest, signature, pubkey)
        .map_err(|_| OxibootError::SignatureInvalid)
}

#[cfg(feature = "ml-dsa")]
fn verify_ml_dsa(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    use fips204::ml_dsa_44::{PublicKey, PK_LEN, SIG_LEN};
    use fips204::traits::{SerDes, Verifier};

    let pk_bytes: [u8; PK_LEN] = pubkey.try_into().map_err(|_| OxibootError::KeyImport)?;
    let pk = PublicKey::try_from_bytes(&pk_bytes).map_err(|_| OxibootError::KeyImport)?;
    let sig: [u8; SIG_LEN] = signature
        .try_into()
        .map_err(|_| OxibootError::SignatureInvalid)?;
    if pk.verify(digest, &sig, &[]) {
        Ok(())
    } else {
        Err(OxibootError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_type_round_trip() {
        for auth in [
            AUTH_KEY_ED25519,
            AUTH_KEY_ECC256,
            AUTH_KEY_RSA2048,
            AUTH_KEY_RSA4096,
            AUTH_KEY_ED448,
            AUTH_KEY_ECC384,
            AUTH_KEY_ECC521,
            AUTH_KEY_RSA3072,
            AUTH_KEY_LMS,
            AUTH_KEY_XMSS,
            AUTH_KEY_ML_DSA,
        ] {
            let alg = SigAlg::from_auth_type(auth).unwrap();
            assert_eq!(alg.key_type(), auth as u32);
        }
        assert_eq!(
            SigAlg::from_auth_type(0x0A),
            Err(OxibootError::UnsupportedAlgorithm)
        );
    }

    #[cfg(feature = "ed25519")]
    #[test]
    fn ed25519_verify_and_reject() {
        use ed25519_dalek::{Signer, SigningKey};
        use rand::rngs::OsRng;

        let sk = SigningKey::generate(&mut OsRng);
        let digest = [0x42u8; 32];
        let sig = sk.sign(&digest);
        let pk = sk.verifying_key().to_bytes();

        verify_signature(SigAlg::Ed25519, &pk, &digest, &sig.to_bytes()).unwrap();

        let mut bad = sig.to_bytes();
        bad[0] ^= 1;
        assert_eq!(
            verify_signature(SigAlg::Ed25519, &pk, &digest, &bad),
            Err(OxibootError::SignatureInvalid)
        );
    }

    #[cfg(feature = "nistp256")]
    #[test]
    fn ecc256_raw_rs_verify_and_reject() {
        use p256::ecdsa::signature::hazmat::PrehashSigner;
        use p256::ecdsa::{Signature, SigningKey};
        use rand::rngs::OsRng;

        let sk = SigningKey::random(&mut OsRng);
        let digest = [0x17u8; 32];
        let sig: Signature = sk.sign_prehash(&digest).unwrap();
        // raw x ‖ y, no SEC1 point tag
        let pk_point = sk.verifying_key().to_encoded_point(false);
        let pk = &pk_point.as_bytes()[1..];
        assert_eq!(pk.len(), KEYSTORE_PUBKEY_SIZE_ECC256);

        let raw: [u8; 64] = sig.to_bytes().into();
        verify_signature(SigAlg::Ecc256, pk, &digest, &raw).unwrap();

        let mut bad = raw;
        bad[10] ^= 0x80;
        assert!(verify_signature(SigAlg::Ecc256, pk, &digest, &bad).is_err());
    }

    #[cfg(feature = "nistp256")]
    #[test]
    fn ecc256_rejects_key_off_curve() {
        let pk = [0u8; KEYSTORE_PUBKEY_SIZE_ECC256];
        // (0, 0) does not satisfy the curve equation
        assert_eq!(
            verify_signature(SigAlg::Ecc256, &pk, &[0u8; 32], &[0u8; 64]),
            Err(OxibootError::KeyImport)
        );
    }
}
