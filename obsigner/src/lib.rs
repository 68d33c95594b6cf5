//! Library half of the signing tool. The oxiboot test-suite links this
//! to mint images; the `obsigner` binary is a thin argument parser over
//! the same functions.

pub mod curve;
pub mod delta;
pub mod imgsigner;
pub mod keygen;

use signature::Error as SigningError;

/// The result type for obsigner.
pub type Result<T> = core::result::Result<T, ObSignerError>;

#[derive(Debug)]
pub enum ObSignerError {
    /// The hash output or length is invalid.
    BadHashValue,
    /// Signature Error
    SignatureError(SigningError),
    /// Key Error
    KeyError(SigningError),
    /// An invalid key type was provided
    InvalidKeyType,
    /// The header options overflow the chosen header size.
    HeaderOverflow,
    /// Inconsistent signing parameters (e.g. delta info without sizes).
    BadParams(&'static str),
}

impl core::fmt::Display for ObSignerError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ObSignerError::BadHashValue => write!(f, "bad hash value"),
            ObSignerError::SignatureError(e) => write!(f, "signing failed: {}", e),
            ObSignerError::KeyError(e) => write!(f, "key import failed: {}", e),
            ObSignerError::InvalidKeyType => write!(f, "invalid key type"),
            ObSignerError::HeaderOverflow => write!(f, "header options overflow the header size"),
            ObSignerError::BadParams(what) => write!(f, "bad parameters: {}", what),
        }
    }
}

impl std::error::Error for ObSignerError {}
