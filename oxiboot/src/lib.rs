#![cfg_attr(not(test), no_std)]

// A hash algorithm is a build-time singleton: the manifest digest, the
// keystore pubkey hints and the TPM measurements all use the same one.
#[cfg(all(feature = "sha256", feature = "sha384"))]
compile_error!("select exactly one hash feature: sha256, sha384 or sha3-384");
#[cfg(all(feature = "sha256", feature = "sha3-384"))]
compile_error!("select exactly one hash feature: sha256, sha384 or sha3-384");
#[cfg(all(feature = "sha384", feature = "sha3-384"))]
compile_error!("select exactly one hash feature: sha256, sha384 or sha3-384");

#[cfg(all(feature = "encrypt-aes128", feature = "encrypt-aes256"))]
compile_error!("select at most one update cipher");
#[cfg(all(feature = "encrypt-aes128", feature = "encrypt-chacha"))]
compile_error!("select at most one update cipher");
#[cfg(all(feature = "encrypt-aes256", feature = "encrypt-chacha"))]
compile_error!("select at most one update cipher");

mod fmt;

pub mod constants;
pub mod flashapi;
pub mod image;
pub mod keystore;
pub mod parser;

#[cfg(any(feature = "sha256", feature = "sha384", feature = "sha3-384"))]
pub mod crypto;
#[cfg(any(feature = "sha256", feature = "sha384", feature = "sha3-384"))]
pub mod update;

#[cfg(all(
    feature = "tpm",
    any(feature = "sha256", feature = "sha384", feature = "sha3-384")
))]
pub mod tpm;

#[cfg(feature = "uart-flash")]
pub mod uart_flash;

use core::fmt as core_fmt;

use oxiboot_hal::FlashIoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The OxibootError type.
pub enum OxibootError {
    /// An operation is not permitted in the current partition state.
    InvalidState,
    /// Bad image magic, a TLV that overruns the header region, or a
    /// required tag is absent.
    MalformedImage,
    /// The computed image digest does not match the one in the manifest.
    DigestMismatch,
    /// No keystore slot matches the manifest's pubkey hint with
    /// permission for the image's partition id.
    NoAuthorizedKey,
    /// The cryptographic signature check came back negative.
    SignatureInvalid,
    /// Flash program/erase failed; fatal for the current boot attempt.
    FlashIo,
    /// The partition trailer is not in any recognizable state.
    StateInconsistent,
    /// The staged update is not acceptable, e.g. its version is lower
    /// than the running firmware and downgrades are disallowed.
    UpdateRejected,
    /// Reached the end of the header options while scanning for a tag.
    TlvNotFound,
    /// The size field of an image header does not fit its partition.
    InvalidFirmwareSize,
    /// The length of the requested header field is invalid.
    InvalidHdrFieldLength,
    /// The sector flag nibble holds an undefined value.
    InvalidSectFlag,
    /// A header field has an invalid value.
    InvalidValue,
    /// The manifest names a signature algorithm this build lacks.
    UnsupportedAlgorithm,
    /// Public key bytes from the keystore failed to import.
    KeyImport,
}

/// The result type for oxiboot.
pub type Result<T> = core::result::Result<T, OxibootError>;

#[rustfmt::skip]
impl core_fmt::Display for OxibootError {
    fn fmt(&self, f: &mut core_fmt::Formatter) -> core_fmt::Result {
        match self {
            OxibootError::InvalidState          => write!(f, "operation not permitted in the current state"),
            OxibootError::MalformedImage        => write!(f, "the image manifest is malformed"),
            OxibootError::DigestMismatch        => write!(f, "image digest mismatch"),
            OxibootError::NoAuthorizedKey       => write!(f, "no authorized key for this image"),
            OxibootError::SignatureInvalid      => write!(f, "signature verification failed"),
            OxibootError::FlashIo               => write!(f, "flash i/o failure"),
            OxibootError::StateInconsistent     => write!(f, "partition trailer state is inconsistent"),
            OxibootError::UpdateRejected        => write!(f, "staged update rejected"),
            OxibootError::TlvNotFound           => write!(f, "reached end of header options"),
            OxibootError::InvalidFirmwareSize   => write!(f, "firmware size field is invalid"),
            OxibootError::InvalidHdrFieldLength => write!(f, "header field length is invalid"),
            OxibootError::InvalidSectFlag       => write!(f, "sector flag value is invalid"),
            OxibootError::InvalidValue          => write!(f, "header field has an invalid value"),
            OxibootError::UnsupportedAlgorithm  => write!(f, "signature algorithm not compiled in"),
            OxibootError::KeyImport             => write!(f, "public key import failed"),
        }
    }
}

impl From<FlashIoError> for OxibootError {
    fn from(_: FlashIoError) -> Self {
        OxibootError::FlashIo
    }
}
