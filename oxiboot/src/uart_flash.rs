//! UART recovery protocol: a host PC drives the target's flash over a
//! byte-acknowledged serial framing, either to stage an update into a
//! bricked device or to emulate the external update medium.
//!
//! Host-initiated. Commands start with `'W'` (flash operation) or `'V'`
//! (version report); every byte of a multi-byte payload is acknowledged
//! with `0x06` by its receiver before the next byte moves. Flash
//! operations carry `address: u32 LE, length: u32 LE`; ERASE
//! acknowledges a second time once the erase completed.

use oxiboot_hal::{FlashInterface, UartError, UartIo};

use crate::constants::FLASHBUFFER_SIZE;
use crate::{OxibootError, Result};

pub const UART_ACK: u8 = 0x06;
pub const UART_CMD_FLASH: u8 = 0x57; /* 'W' */
pub const UART_CMD_VERSION: u8 = 0x56; /* 'V' */
pub const UART_OP_WRITE: u8 = 0x01;
pub const UART_OP_READ: u8 = 0x02;
pub const UART_OP_ERASE: u8 = 0x03;

/// Serves flash requests over a UART until the host stops sending.
pub struct UartFlashServer<'a, U, F> {
    uart: &'a mut U,
    flash: &'a F,
    version: u32,
}

impl<'a, U, F> UartFlashServer<'a, U, F>
where
    U: UartIo,
    F: FlashInterface,
{
    pub fn new(uart: &'a mut U, flash: &'a F, version: u32) -> Self {
        UartFlashServer {
            uart,
            flash,
            version,
        }
    }

    /// Command loop. Returns `Ok` when the line goes quiet between
    /// commands; a line or flash failure mid-command is an error.
    pub fn serve(&mut self) -> Result<()> {
        loop {
            let cmd = match self.uart.read_byte() {
                Ok(byte) => byte,
                Err(UartError::Rx) => return Ok(()),
                Err(_) => return Err(OxibootError::FlashIo),
            };
            match cmd {
                UART_CMD_VERSION => {
                    self.ack()?;
                    let version = self.version;
                    for byte in version.to_le_bytes() {
                        self.send_acked(byte)?;
                    }
                }
                UART_CMD_FLASH => {
                    self.ack()?;
                    self.serve_flash_op()?;
                }
                _ => {
                    // tolerate line noise between commands
                    trace!("ignoring unexpected command byte {}", cmd);
                }
            }
        }
    }

    fn serve_flash_op(&mut self) -> Result<()> {
        let op = self.recv_acked()?;
        let addr = self.recv_u32()?;
        let len = self.recv_u32()? as usize;
        match op {
            UART_OP_WRITE => {
                self.flash.hal_flash_unlock();
                let mut buf = [0u8; FLASHBUFFER_SIZE];
                let mut pos = 0;
                while pos < len {
                    let chunk = core::cmp::min(FLASHBUFFER_SIZE, len - pos);
                    for slot in buf[..chunk].iter_mut() {
                        *slot = self.recv_acked()?;
                    }
                    self.flash.hal_flash_write(addr + pos as u32, &buf[..chunk])?;
                    pos += chunk;
                }
                self.flash.hal_flash_lock();
                Ok(())
            }
            UART_OP_READ => {
                let mut buf = [0u8; FLASHBUFFER_SIZE];
                let mut pos = 0;
                while pos < len {
                    let chunk = core::cmp::min(FLASHBUFFER_SIZE, len - pos);
                    self.flash.hal_flash_read(addr + pos as u32, &mut buf[..chunk])?;
                    for byte in &buf[..chunk] {
                        self.send_acked(*byte)?;
                    }
                    pos += chunk;
                }
                Ok(())
            }
            UART_OP_ERASE => {
                self.flash.hal_flash_unlock();
                self.flash.hal_flash_erase(addr, len)?;
                self.flash.hal_flash_lock();
                // second ack reports completion
                self.ack()
            }
            _ => Err(OxibootError::InvalidValue),
        }
    }

    fn ack(&mut self) -> Result<()> {
        self.uart
            .write_byte(UART_ACK)
            .map_err(|_| OxibootError::FlashIo)
    }

    fn recv_acked(&mut self) -> Result<u8> {
        let byte = self
            .uart
            .read_byte()
            .map_err(|_| OxibootError::FlashIo)?;
        self.ack()?;
        Ok(byte)
    }

    fn recv_u32(&mut self) -> Result<u32> {
        let mut word = [0u8; 4];
        for slot in word.iter_mut() {
            *slot = self.recv_acked()?;
        }
        Ok(u32::from_le_bytes(word))
    }

    fn send_acked(&mut self, byte: u8) -> Result<()> {
        self.uart
            .write_byte(byte)
            .map_err(|_| OxibootError::FlashIo)?;
        match self.uart.read_byte() {
            Ok(UART_ACK) => Ok(()),
            _ => Err(OxibootError::InvalidValue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxiboot_hal::sim::{SimFlash, SimUart};

    #[test]
    fn version_report() {
        let flash = SimFlash::new(0x2000, 0x1000);
        let mut uart = SimUart::new();
        uart.push_host_bytes(&[UART_CMD_VERSION]);
        // host acks for the four version bytes
        uart.push_host_bytes(&[UART_ACK; 4]);

        UartFlashServer::new(&mut uart, &flash, 0x0102_0304)
            .serve()
            .unwrap();
        assert_eq!(
            uart.device_output(),
            &[UART_ACK, 0x04, 0x03, 0x02, 0x01][..]
        );
    }

    #[test]
    fn write_programs_flash_and_acks_every_byte() {
        let flash = SimFlash::new(0x2000, 0x1000);
        let mut uart = SimUart::new();
        let mut script = vec![UART_CMD_FLASH, UART_OP_WRITE];
        script.extend_from_slice(&0x10u32.to_le_bytes());
        script.extend_from_slice(&4u32.to_le_bytes());
        script.extend_from_slice(b"boot");
        uart.push_host_bytes(&script);

        UartFlashServer::new(&mut uart, &flash, 1).serve().unwrap();

        assert_eq!(flash.dump(0x10, 4), b"boot");
        // one ack per received byte: cmd, op, 8 addr/len bytes, 4 data bytes
        assert_eq!(uart.device_output(), &[UART_ACK; 14][..]);
    }

    #[test]
    fn read_streams_flash_bytes() {
        let flash = SimFlash::new(0x2000, 0x1000);
        flash.load(0x40, b"WOLF");
        let mut uart = SimUart::new();
        let mut script = vec![UART_CMD_FLASH, UART_OP_READ];
        script.extend_from_slice(&0x40u32.to_le_bytes());
        script.extend_from_slice(&4u32.to_le_bytes());
        // host acks for the four data bytes
        script.extend_from_slice(&[UART_ACK; 4]);
        uart.push_host_bytes(&script);

        UartFlashServer::new(&mut uart, &flash, 1).serve().unwrap();

        let mut expect = vec![UART_ACK; 10];
        expect.extend_from_slice(b"WOLF");
        assert_eq!(uart.device_output(), &expect[..]);
    }

    #[test]
    fn erase_acks_twice() {
        let flash = SimFlash::new(0x2000, 0x1000);
        flash.load(0x1000, &[0u8; 16]);
        let mut uart = SimUart::new();
        let mut script = vec![UART_CMD_FLASH, UART_OP_ERASE];
        script.extend_from_slice(&0x1000u32.to_le_bytes());
        script.extend_from_slice(&0x1000u32.to_le_bytes());
        uart.push_host_bytes(&script);

        UartFlashServer::new(&mut uart, &flash, 1).serve().unwrap();

        assert_eq!(flash.dump(0x1000, 16), vec![0xFF; 16]);
        // 10 reception acks plus the completion ack
        assert_eq!(uart.device_output(), &[UART_ACK; 11][..]);
    }

    #[test]
    fn noise_between_commands_is_ignored() {
        let flash = SimFlash::new(0x2000, 0x1000);
        let mut uart = SimUart::new();
        uart.push_host_bytes(&[0x00, 0xFF, UART_CMD_VERSION]);
        uart.push_host_bytes(&[UART_ACK; 4]);

        UartFlashServer::new(&mut uart, &flash, 7).serve().unwrap();
        assert_eq!(uart.device_output()[0], UART_ACK);
    }
}
