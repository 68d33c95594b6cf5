//! Host-side device models for the test-suite: a NOR-semantics flash with
//! power-cut injection, a scripted UART and a small TPM with a SHA-256
//! PCR bank. Nothing in here runs on a target.

use core::cell::{Cell, RefCell};

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::vec::Vec;

use crate::{FlashInterface, FlashIoError, TpmError, TpmInterface, UartError, UartIo};

/// In-memory flash with real NOR programming rules: a program operation
/// can only move bits toward the programmed polarity, an erase restores a
/// whole sector to the erased byte. Reads are free; every program/erase
/// decrements the optional power budget so a test can cut power at any
/// write boundary and replay the boot.
pub struct SimFlash {
    mem: RefCell<Vec<u8>>,
    sector_size: usize,
    erased: u8,
    budget: Cell<Option<usize>>,
    ops: Cell<usize>,
}

impl SimFlash {
    pub fn new(size: usize, sector_size: usize) -> Self {
        Self::with_erased_byte(size, sector_size, 0xFF)
    }

    /// `erased` is `0xFF` for conventional NOR, `0x00` for inverted-flag
    /// parts where programming sets bits.
    pub fn with_erased_byte(size: usize, sector_size: usize, erased: u8) -> Self {
        assert!(size % sector_size == 0);
        SimFlash {
            mem: RefCell::new(std::vec![erased; size]),
            sector_size,
            erased,
            budget: Cell::new(None),
            ops: Cell::new(0),
        }
    }

    /// Cut power after `ops` more successful program/erase operations.
    /// Every later operation fails with [`FlashIoError::PowerCut`] until
    /// [`Self::power_restore`].
    pub fn set_power_cut(&self, ops: usize) {
        self.budget.set(Some(ops));
    }

    pub fn power_restore(&self) {
        self.budget.set(None);
    }

    /// Total program/erase operations performed so far. Used by the
    /// power-fail sweep to bound the cut points worth exploring.
    pub fn op_count(&self) -> usize {
        self.ops.get()
    }

    /// Test backdoor: place bytes without NOR rules, as an external
    /// programmer or factory image would.
    pub fn load(&self, addr: u32, data: &[u8]) {
        let mut mem = self.mem.borrow_mut();
        mem[addr as usize..addr as usize + data.len()].copy_from_slice(data);
    }

    pub fn dump(&self, addr: u32, len: usize) -> Vec<u8> {
        let mem = self.mem.borrow();
        mem[addr as usize..addr as usize + len].to_vec()
    }

    fn spend(&self) -> Result<(), FlashIoError> {
        match self.budget.get() {
            Some(0) => Err(FlashIoError::PowerCut),
            Some(n) => {
                self.budget.set(Some(n - 1));
                self.ops.set(self.ops.get() + 1);
                Ok(())
            }
            None => {
                self.ops.set(self.ops.get() + 1);
                Ok(())
            }
        }
    }
}

impl FlashInterface for SimFlash {
    fn hal_init(&self) {}
    fn hal_flash_unlock(&self) {}
    fn hal_flash_lock(&self) {}

    fn hal_flash_read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashIoError> {
        let mem = self.mem.borrow();
        let start = addr as usize;
        let end = start.checked_add(buf.len()).ok_or(FlashIoError::Bounds)?;
        if end > mem.len() {
            return Err(FlashIoError::Bounds);
        }
        buf.copy_from_slice(&mem[start..end]);
        Ok(())
    }

    fn hal_flash_write(&self, addr: u32, data: &[u8]) -> Result<(), FlashIoError> {
        let start = addr as usize;
        {
            let mem = self.mem.borrow();
            let end = start.checked_add(data.len()).ok_or(FlashIoError::Bounds)?;
            if end > mem.len() {
                return Err(FlashIoError::Bounds);
            }
        }
        self.spend()?;
        let mut mem = self.mem.borrow_mut();
        for (cell, byte) in mem[start..start + data.len()].iter_mut().zip(data) {
            // programming can only move bits toward the programmed state
            if self.erased == 0xFF {
                *cell &= *byte;
            } else {
                *cell |= *byte;
            }
        }
        Ok(())
    }

    fn hal_flash_erase(&self, addr: u32, len: usize) -> Result<(), FlashIoError> {
        let start = addr as usize;
        if start % self.sector_size != 0 || len % self.sector_size != 0 {
            return Err(FlashIoError::Bounds);
        }
        {
            let mem = self.mem.borrow();
            if start + len > mem.len() {
                return Err(FlashIoError::Bounds);
            }
        }
        self.spend()?;
        let mut mem = self.mem.borrow_mut();
        mem[start..start + len].fill(self.erased);
        Ok(())
    }

    fn boot_to(&self, addr: u32) -> ! {
        panic!("sim: handoff to {:#010x}", addr);
    }

    fn reboot(&self) -> ! {
        panic!("sim: warm reset requested");
    }
}

/// Scripted serial endpoint: the test preloads the bytes "the host" will
/// send and collects everything the device wrote back.
pub struct SimUart {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl SimUart {
    pub fn new() -> Self {
        SimUart {
            rx: VecDeque::new(),
            tx: Vec::new(),
        }
    }

    pub fn push_host_bytes(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn device_output(&self) -> &[u8] {
        &self.tx
    }
}

impl Default for SimUart {
    fn default() -> Self {
        Self::new()
    }
}

impl UartIo for SimUart {
    fn read_byte(&mut self) -> Result<u8, UartError> {
        self.rx.pop_front().ok_or(UartError::Rx)
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), UartError> {
        self.tx.push(byte);
        Ok(())
    }
}

pub const SIM_PCR_COUNT: usize = 24;

/// TPM model: SHA-256 PCR bank plus a sealed-blob store keyed by NV
/// index. `seal` is the test-side provisioning hook; `nv_unseal` follows
/// the trait contract and releases a blob only when the caller's policy
/// digest matches the one it was sealed under.
pub struct SimTpm {
    pcrs: [[u8; 32]; SIM_PCR_COUNT],
    sealed: Vec<(u32, [u8; 32], Vec<u8>)>,
}

impl SimTpm {
    pub fn new() -> Self {
        SimTpm {
            pcrs: [[0u8; 32]; SIM_PCR_COUNT],
            sealed: Vec::new(),
        }
    }

    pub fn seal(&mut self, nv_index: u32, policy_digest: [u8; 32], secret: &[u8]) {
        self.sealed.retain(|(idx, _, _)| *idx != nv_index);
        self.sealed.push((nv_index, policy_digest, secret.to_vec()));
    }

    pub fn pcr_value(&self, pcr: u8) -> [u8; 32] {
        self.pcrs[pcr as usize]
    }
}

impl Default for SimTpm {
    fn default() -> Self {
        Self::new()
    }
}

impl TpmInterface for SimTpm {
    fn pcr_extend(&mut self, pcr: u8, digest: &[u8]) -> Result<(), TpmError> {
        let slot = self.pcrs.get_mut(pcr as usize).ok_or(TpmError::Io)?;
        let mut h = Sha256::new();
        h.update(&slot[..]);
        h.update(digest);
        slot.copy_from_slice(&h.finalize());
        Ok(())
    }

    fn pcr_read(&self, pcr: u8, out: &mut [u8]) -> Result<usize, TpmError> {
        let slot = self.pcrs.get(pcr as usize).ok_or(TpmError::Io)?;
        if out.len() < slot.len() {
            return Err(TpmError::BufferTooSmall);
        }
        out[..slot.len()].copy_from_slice(slot);
        Ok(slot.len())
    }

    fn nv_unseal(
        &mut self,
        nv_index: u32,
        policy_digest: &[u8],
        out: &mut [u8],
    ) -> Result<usize, TpmError> {
        let (_, policy, secret) = self
            .sealed
            .iter()
            .find(|(idx, _, _)| *idx == nv_index)
            .ok_or(TpmError::NotFound)?;
        if policy_digest != &policy[..] {
            return Err(TpmError::PolicyMismatch);
        }
        if out.len() < secret.len() {
            return Err(TpmError::BufferTooSmall);
        }
        out[..secret.len()].copy_from_slice(secret);
        Ok(secret.len())
    }
}
