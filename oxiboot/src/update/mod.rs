pub mod update_flash;

#[cfg(feature = "delta")]
pub mod delta;

#[cfg(any(
    feature = "encrypt-aes128",
    feature = "encrypt-aes256",
    feature = "encrypt-chacha"
))]
pub mod encrypt;

use crate::Result;

/// The top-level operations an integration calls: arm an update, confirm
/// the running image, and the power-on entry point itself.
pub trait UpdateInterface: crate::flashapi::FlashApi {
    /// Power-on entry: resolve partition states, run or resume the swap,
    /// verify BOOT and hand control to it. Halts in place when every
    /// boot option is exhausted.
    fn oxiboot_start(self) -> !;
    /// Marks the staged image in UPDATE for installation at next boot.
    fn update_trigger(self) -> Result<()>;
    /// Called (on behalf of) the running image to confirm it boots;
    /// turns TESTING into SUCCESS and disarms rollback.
    fn update_success(self) -> Result<()>;
}
