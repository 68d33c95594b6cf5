use ed25519_dalek::Signer;
use p256::ecdsa::signature::hazmat::PrehashSigner;

use oxiboot::constants::{AUTH_KEY_ECC256, AUTH_KEY_ED25519};

use crate::{ObSignerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveType {
    Ed25519,
    NistP256,
}

impl CurveType {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ed25519" => Ok(CurveType::Ed25519),
            "nistp256" | "ecc256" => Ok(CurveType::NistP256),
            _ => Err(ObSignerError::InvalidKeyType),
        }
    }
}

#[derive(Debug)]
pub enum SigningKeyType {
    Ed25519(ed25519_dalek::SigningKey),
    NistP256(p256::ecdsa::SigningKey),
}

/// Imports a raw signing key.
///
/// *Note: this function can be extended to add support for HW
/// secure elements*
pub fn import_signing_key(curve: CurveType, bytes: &[u8]) -> Result<SigningKeyType> {
    match curve {
        CurveType::Ed25519 => {
            let sk: &[u8; 32] = bytes
                .try_into()
                .map_err(|_| ObSignerError::InvalidKeyType)?;
            Ok(SigningKeyType::Ed25519(ed25519_dalek::SigningKey::from_bytes(sk)))
        }
        CurveType::NistP256 => {
            let sk = p256::ecdsa::SigningKey::from_slice(bytes)
                .map_err(ObSignerError::KeyError)?;
            Ok(SigningKeyType::NistP256(sk))
        }
    }
}

impl SigningKeyType {
    /// Auth-type byte this key produces in IMG_TYPE / keystore entries.
    pub fn auth_type(&self) -> u8 {
        match self {
            SigningKeyType::Ed25519(_) => AUTH_KEY_ED25519,
            SigningKeyType::NistP256(_) => AUTH_KEY_ECC256,
        }
    }

    /// Raw public key exactly as the keystore stores it.
    pub fn pubkey_bytes(&self) -> Vec<u8> {
        match self {
            SigningKeyType::Ed25519(sk) => sk.verifying_key().to_bytes().to_vec(),
            SigningKeyType::NistP256(sk) => {
                // raw x ‖ y, no SEC1 point tag
                let point = sk.verifying_key().to_encoded_point(false);
                point.as_bytes()[1..].to_vec()
            }
        }
    }

    /// Signs the image digest; the digest itself is the message.
    pub fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>> {
        match self {
            SigningKeyType::Ed25519(sk) => Ok(sk.sign(digest).to_bytes().to_vec()),
            SigningKeyType::NistP256(sk) => {
                let sig: p256::ecdsa::Signature = sk
                    .sign_prehash(digest)
                    .map_err(ObSignerError::SignatureError)?;
                Ok(sig.to_bytes().to_vec())
            }
        }
    }

    /// Secret key bytes as written to a key file by `keygen`.
    pub fn secret_bytes(&self) -> Vec<u8> {
        match self {
            SigningKeyType::Ed25519(sk) => sk.to_bytes().to_vec(),
            SigningKeyType::NistP256(sk) => sk.to_bytes().to_vec(),
        }
    }
}
