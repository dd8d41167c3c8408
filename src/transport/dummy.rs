//! In-memory target used for simulation and testing
//!
//! Memory is sparse and reads as zero until written. Reset line levels and
//! scratch registers are tracked so callers can inspect them.

use std::collections::HashMap;

use log::trace;

use super::MemoryTransport;
use crate::error::Error;

const PAGE_SIZE: u64 = 4096;

/// A target whose memory lives in host RAM
#[derive(Debug, Default)]
pub struct DummyCable {
    pages: HashMap<u64, Box<[u8; PAGE_SIZE as usize]>>,
    regs: HashMap<u32, u32>,
    jtag_reset: bool,
    chip_reset: bool,
}

impl DummyCable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the JTAG reset line is currently asserted
    pub fn jtag_reset_active(&self) -> bool {
        self.jtag_reset
    }

    /// Whether the chip reset line is currently asserted
    pub fn chip_reset_active(&self) -> bool {
        self.chip_reset
    }

    /// Read memory without going through the transport interface.
    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        for (i, byte) in buf.iter_mut().enumerate() {
            let addr = addr.wrapping_add(i as u64);
            if let Some(page) = self.pages.get(&(addr / PAGE_SIZE)) {
                *byte = page[(addr % PAGE_SIZE) as usize];
            }
        }

        buf
    }
}

impl MemoryTransport for DummyCable {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Error> {
        trace!("dummy read {:#x} ({} bytes)", addr, buf.len());
        buf.copy_from_slice(&self.peek(addr, buf.len()));

        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        trace!("dummy write {:#x} ({} bytes)", addr, data.len());

        let mut addr = addr;
        let mut data = data;
        while !data.is_empty() {
            let offset = (addr % PAGE_SIZE) as usize;
            let len = data.len().min(PAGE_SIZE as usize - offset);
            let page = self
                .pages
                .entry(addr / PAGE_SIZE)
                .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));

            page[offset..offset + len].copy_from_slice(&data[..len]);

            addr = addr.wrapping_add(len as u64);
            data = &data[len..];
        }

        Ok(())
    }

    fn jtag_reset(&mut self, active: bool) -> Result<(), Error> {
        self.jtag_reset = active;
        Ok(())
    }

    fn chip_reset(&mut self, active: bool) -> Result<(), Error> {
        self.chip_reset = active;
        Ok(())
    }

    fn jtag_set_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<(), Error> {
        self.regs.insert(reg, value & width_mask(width));
        Ok(())
    }

    fn jtag_get_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<u32, Error> {
        let mask = width_mask(width);
        let previous = self.regs.insert(reg, value & mask).unwrap_or_default();

        Ok(previous & mask)
    }
}

fn width_mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}
