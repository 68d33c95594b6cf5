pub mod hash;
pub mod signatures;

#[cfg(feature = "xmss")]
pub mod xmss;
