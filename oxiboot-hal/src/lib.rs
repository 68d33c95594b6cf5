#![no_std]

#[cfg(feature = "sim")]
extern crate std;

#[cfg(feature = "sim")]
pub mod sim;

/// Errors surfaced by a flash driver. The core treats every variant as
/// `FlashIo` (fatal for the current boot attempt); the distinction only
/// matters to the driver itself and to the simulator's test harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashIoError {
    /// Program operation failed or the ready-poll retry budget ran out.
    Program,
    /// Erase operation failed or timed out.
    Erase,
    /// Address/length outside the device, or erase not sector-aligned.
    Bounds,
    /// Simulated power loss (see [`sim::SimFlash::set_power_cut`]).
    PowerCut,
}

/// The flash operations the bootloader core consumes. One implementation
/// per device; the core never touches memory-mapped registers itself.
///
/// `addr` is device-absolute. Write units follow the platform minimum:
/// drivers for 4- or 8-byte-word flashes must read-modify-write aligned
/// units internally so that the core can issue byte-granular writes.
/// Drivers poll their ready registers with a bounded retry count and
/// report exhaustion as an error rather than spinning forever.
pub trait FlashInterface {
    fn hal_init(&self);
    fn hal_flash_unlock(&self);
    fn hal_flash_lock(&self);
    fn hal_flash_read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashIoError>;
    fn hal_flash_write(&self, addr: u32, data: &[u8]) -> Result<(), FlashIoError>;
    /// `len` must be a multiple of the device sector size.
    fn hal_flash_erase(&self, addr: u32, len: usize) -> Result<(), FlashIoError>;

    /// Arch-specific teardown before handing control to the image:
    /// disable interrupts, restore clocks, relocate the vector table.
    fn hal_prepare_boot(&self) {}

    /// Jump to the image entry point. Never returns.
    fn boot_to(&self, addr: u32) -> !;

    /// Warm-reset the device. Never returns.
    fn reboot(&self) -> !;
}

impl<T: FlashInterface> FlashInterface for &T {
    fn hal_init(&self) {
        (**self).hal_init()
    }
    fn hal_flash_unlock(&self) {
        (**self).hal_flash_unlock()
    }
    fn hal_flash_lock(&self) {
        (**self).hal_flash_lock()
    }
    fn hal_flash_read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashIoError> {
        (**self).hal_flash_read(addr, buf)
    }
    fn hal_flash_write(&self, addr: u32, data: &[u8]) -> Result<(), FlashIoError> {
        (**self).hal_flash_write(addr, data)
    }
    fn hal_flash_erase(&self, addr: u32, len: usize) -> Result<(), FlashIoError> {
        (**self).hal_flash_erase(addr, len)
    }
    fn hal_prepare_boot(&self) {
        (**self).hal_prepare_boot()
    }
    fn boot_to(&self, addr: u32) -> ! {
        (**self).boot_to(addr)
    }
    fn reboot(&self) -> ! {
        (**self).reboot()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartError {
    /// No byte available (simulator script exhausted) or line error.
    Rx,
    Tx,
}

/// Blocking byte-wide serial port, used by the recovery protocol.
pub trait UartIo {
    fn read_byte(&mut self) -> Result<u8, UartError>;
    fn write_byte(&mut self, byte: u8) -> Result<(), UartError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmError {
    Io,
    /// Current PCR state does not satisfy the sealing policy.
    PolicyMismatch,
    /// No sealed blob at the requested NV index.
    NotFound,
    BufferTooSmall,
}

/// The TPM primitives the core consumes for measured boot and sealed
/// secrets. Session and SRK management stay inside the implementation;
/// the core only ever sees digests going in and secret bytes coming out.
pub trait TpmInterface {
    fn pcr_extend(&mut self, pcr: u8, digest: &[u8]) -> Result<(), TpmError>;
    /// Returns the number of digest bytes written into `out`.
    fn pcr_read(&self, pcr: u8, out: &mut [u8]) -> Result<usize, TpmError>;
    /// Releases the secret sealed at `nv_index` iff `policy_digest`
    /// matches the digest the blob was sealed under.
    fn nv_unseal(
        &mut self,
        nv_index: u32,
        policy_digest: &[u8],
        out: &mut [u8],
    ) -> Result<usize, TpmError>;
}
