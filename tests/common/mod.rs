#![allow(dead_code)]

use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use debug_bridge::{
    error::Error,
    flasher::FlasherHeader,
    transport::{DummyCable, MemoryTransport},
};

const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHN_ABS: u16 = 0xfff1;

struct Segment {
    kind: u32,
    paddr: u64,
    data: Vec<u8>,
    mem_size: u64,
}

/// Field sizes of the 32- and 64-bit ELF classes
#[derive(Clone, Copy)]
struct Class {
    wide: bool,
}

impl Class {
    fn ehdr_size(self) -> usize {
        if self.wide { 64 } else { 52 }
    }

    fn phdr_size(self) -> usize {
        if self.wide { 56 } else { 32 }
    }

    fn shdr_size(self) -> usize {
        if self.wide { 64 } else { 40 }
    }

    fn sym_size(self) -> usize {
        if self.wide { 24 } else { 16 }
    }

    fn align(self, out: &mut Vec<u8>) {
        let alignment = if self.wide { 8 } else { 4 };
        while out.len() % alignment != 0 {
            out.push(0);
        }
    }

    /// Push an address-sized field
    fn word(self, out: &mut Vec<u8>, value: u64) {
        if self.wide {
            out.extend_from_slice(&value.to_le_bytes());
        } else {
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
    }

    fn shdr(
        self,
        out: &mut Vec<u8>,
        name: u32,
        kind: u32,
        offset: u64,
        size: u64,
        link: u32,
    ) {
        let symtab = kind == SHT_SYMTAB;

        push_u32(out, name);
        push_u32(out, kind);
        self.word(out, 0); // flags
        self.word(out, 0); // addr
        self.word(out, offset);
        self.word(out, size);
        push_u32(out, link);
        push_u32(out, if symtab { 1 } else { 0 });
        self.word(out, if symtab { 8 } else { 1 });
        self.word(out, if symtab { self.sym_size() as u64 } else { 0 });
    }
}

/// Builds small little-endian ELF executables, 32-bit unless asked otherwise
#[derive(Default)]
pub struct ElfBuilder {
    wide: bool,
    entry: u64,
    segments: Vec<Segment>,
    symbols: Vec<(String, u64)>,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an ELF64 image instead
    pub fn elf64(mut self) -> Self {
        self.wide = true;
        self
    }

    pub fn entry(mut self, entry: u32) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn load(self, paddr: u32, data: &[u8], mem_size: u32) -> Self {
        self.load_at(paddr.into(), data, mem_size.into())
    }

    /// Like [ElfBuilder::load], with 64-bit addresses and sizes
    pub fn load_at(mut self, paddr: u64, data: &[u8], mem_size: u64) -> Self {
        self.segments.push(Segment {
            kind: PT_LOAD,
            paddr,
            data: data.to_vec(),
            mem_size,
        });
        self
    }

    pub fn note(mut self, data: &[u8]) -> Self {
        self.segments.push(Segment {
            kind: PT_NOTE,
            paddr: 0,
            data: data.to_vec(),
            mem_size: data.len() as u64,
        });
        self
    }

    pub fn symbol(mut self, name: &str, value: u32) -> Self {
        self.symbols.push((name.to_string(), value.into()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let class = Class { wide: self.wide };
        let headers = class.ehdr_size() + class.phdr_size() * self.segments.len();
        let mut out = vec![0; headers];

        let mut offsets = Vec::new();
        for segment in &self.segments {
            class.align(&mut out);
            offsets.push(out.len() as u64);
            out.extend_from_slice(&segment.data);
        }

        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; class.sym_size()];
        for (name, value) in &self.symbols {
            let name_offset = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);

            push_u32(&mut symtab, name_offset);
            if class.wide {
                symtab.push(0x11); // global object
                symtab.push(0);
                push_u16(&mut symtab, SHN_ABS);
                symtab.extend_from_slice(&value.to_le_bytes());
                symtab.extend_from_slice(&4u64.to_le_bytes());
            } else {
                push_u32(&mut symtab, *value as u32);
                push_u32(&mut symtab, 4);
                symtab.push(0x11);
                symtab.push(0);
                push_u16(&mut symtab, SHN_ABS);
            }
        }
        let shstrtab = b"\0.symtab\0.strtab\0.shstrtab\0";

        class.align(&mut out);
        let symtab_offset = out.len() as u64;
        out.extend_from_slice(&symtab);
        let strtab_offset = out.len() as u64;
        out.extend_from_slice(&strtab);
        let shstrtab_offset = out.len() as u64;
        out.extend_from_slice(shstrtab);

        class.align(&mut out);
        let shoff = out.len() as u64;
        out.resize(out.len() + class.shdr_size(), 0);
        class.shdr(&mut out, 1, SHT_SYMTAB, symtab_offset, symtab.len() as u64, 2);
        class.shdr(&mut out, 9, SHT_STRTAB, strtab_offset, strtab.len() as u64, 0);
        class.shdr(&mut out, 17, SHT_STRTAB, shstrtab_offset, shstrtab.len() as u64, 0);

        let mut header = Vec::with_capacity(headers);
        header.extend_from_slice(b"\x7fELF");
        header.push(if class.wide { 2 } else { 1 });
        header.push(1); // little endian
        header.push(1);
        header.resize(16, 0);
        push_u16(&mut header, 2); // executable
        push_u16(&mut header, 0xf3); // RISC-V
        push_u32(&mut header, 1);
        class.word(&mut header, self.entry);
        class.word(&mut header, class.ehdr_size() as u64);
        class.word(&mut header, shoff);
        push_u32(&mut header, 0);
        push_u16(&mut header, class.ehdr_size() as u16);
        push_u16(&mut header, class.phdr_size() as u16);
        push_u16(&mut header, self.segments.len() as u16);
        push_u16(&mut header, class.shdr_size() as u16);
        push_u16(&mut header, 4);
        push_u16(&mut header, 3);

        for (segment, offset) in self.segments.iter().zip(offsets) {
            push_u32(&mut header, segment.kind);
            if class.wide {
                push_u32(&mut header, 0b110);
            }
            class.word(&mut header, offset);
            class.word(&mut header, segment.paddr);
            class.word(&mut header, segment.paddr);
            class.word(&mut header, segment.data.len() as u64);
            class.word(&mut header, segment.mem_size);
            if !class.wide {
                push_u32(&mut header, 0b110);
            }
            class.word(&mut header, 4);
        }

        out[..headers].copy_from_slice(&header);
        out
    }

    /// Write the image to a file unique to this test process.
    pub fn write(&self, name: &str) -> PathBuf {
        write_temp(name, &self.build())
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write `data` to a temporary file unique to this test process.
pub fn write_temp(name: &str, data: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("debug-bridge-{}-{name}", std::process::id()));
    fs::write(&path, data).unwrap();

    path
}

/// A transport call, as seen by the cable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Read { addr: u64, len: usize },
    Write { addr: u64, data: Vec<u8> },
    JtagReset(bool),
    ChipReset(bool),
    SetReg { reg: u32, width: u32, value: u32 },
    GetReg { reg: u32, width: u32, value: u32 },
}

pub type OpLog = Arc<Mutex<Vec<Op>>>;

/// Forwards every call to `inner`, recording it first
pub struct Recorder<T> {
    pub inner: T,
    log: OpLog,
}

impl<T: MemoryTransport> Recorder<T> {
    pub fn new(inner: T) -> (Self, OpLog) {
        let log = OpLog::default();
        (
            Self {
                inner,
                log: log.clone(),
            },
            log,
        )
    }

    fn record(&self, op: Op) {
        self.log.lock().unwrap().push(op);
    }
}

impl<T: MemoryTransport> MemoryTransport for Recorder<T> {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Error> {
        self.record(Op::Read {
            addr,
            len: buf.len(),
        });
        self.inner.read(addr, buf)
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        self.record(Op::Write {
            addr,
            data: data.to_vec(),
        });
        self.inner.write(addr, data)
    }

    fn jtag_reset(&mut self, active: bool) -> Result<(), Error> {
        self.record(Op::JtagReset(active));
        self.inner.jtag_reset(active)
    }

    fn chip_reset(&mut self, active: bool) -> Result<(), Error> {
        self.record(Op::ChipReset(active));
        self.inner.chip_reset(active)
    }

    fn jtag_set_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<(), Error> {
        self.record(Op::SetReg { reg, width, value });
        self.inner.jtag_set_reg(reg, width, value)
    }

    fn jtag_get_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<u32, Error> {
        self.record(Op::GetReg { reg, width, value });
        self.inner.jtag_get_reg(reg, width, value)
    }
}

/// A chunk as received by [FlasherSim]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedChunk {
    pub data: Vec<u8>,
    pub buffer_size: u32,
}

#[derive(Debug, Default)]
pub struct FlashLog {
    pub chunks: Vec<ReceivedChunk>,
    /// Times the host raised `image_ready` without having seen an acknowledgement
    pub violations: usize,
    pub iterations: Option<u32>,
    pub flash_addr: Option<u32>,
}

/// Flasher firmware stand-in.
///
/// Raises `flasher_ready` only after it has been polled `delay` times, both
/// at start-up and after every chunk.
pub struct FlasherSim {
    memory: DummyCable,
    header: u64,
    buffer: u64,
    delay: usize,
    ready_in: Option<usize>,
    acked: bool,
    last_data: Vec<u8>,
    log: Arc<Mutex<FlashLog>>,
}

impl FlasherSim {
    pub fn new(header: u64, buffer: u64, delay: usize) -> Self {
        let mut memory = DummyCable::new();
        memory
            .write_u32(header + 20, buffer as u32)
            .unwrap();

        Self {
            memory,
            header,
            buffer,
            delay,
            ready_in: Some(delay),
            acked: false,
            last_data: Vec::new(),
            log: Default::default(),
        }
    }

    pub fn log(&self) -> Arc<Mutex<FlashLog>> {
        self.log.clone()
    }

    fn flasher_ready(&self) -> u64 {
        self.header + 4
    }

    fn word(&mut self, offset: u64) -> u32 {
        self.memory.read_u32(self.header + offset).unwrap()
    }
}

impl MemoryTransport for FlasherSim {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Error> {
        if addr == self.flasher_ready() {
            match self.ready_in {
                Some(0) => {
                    self.memory.write_u32(addr, 1)?;
                    self.ready_in = None;
                }
                Some(n) => self.ready_in = Some(n - 1),
                None => {}
            }
        }

        self.memory.read(addr, buf)?;

        if addr == self.flasher_ready() && buf.iter().any(|b| *b != 0) {
            self.acked = true;
        }

        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        self.memory.write(addr, data)?;

        if addr == self.buffer {
            self.last_data = data.to_vec();
        } else if addr == self.header + FlasherHeader::IMAGE_READY_OFFSET && data == [1, 0, 0, 0] {
            if !self.acked {
                self.log.lock().unwrap().violations += 1;
            }
            self.acked = false;
        } else if addr == self.flasher_ready() && data == [0, 0, 0, 0] {
            let buffer_size = self.word(FlasherHeader::BUFFER_SIZE_OFFSET);
            let iterations = self.word(FlasherHeader::ITERATIONS_OFFSET);
            let flash_addr = self.word(FlasherHeader::FLASH_ADDR_OFFSET);

            let mut log = self.log.lock().unwrap();
            log.iterations = Some(iterations);
            log.flash_addr = Some(flash_addr);
            log.chunks.push(ReceivedChunk {
                data: std::mem::take(&mut self.last_data),
                buffer_size,
            });
            drop(log);

            self.memory
                .write_u32(self.header + FlasherHeader::IMAGE_READY_OFFSET, 0)?;
            self.ready_in = Some(self.delay);
        } else if addr == self.header + FlasherHeader::ITERATIONS_OFFSET {
            self.log.lock().unwrap().iterations = Some(self.word(FlasherHeader::ITERATIONS_OFFSET));
        }

        Ok(())
    }

    fn jtag_reset(&mut self, active: bool) -> Result<(), Error> {
        self.memory.jtag_reset(active)
    }

    fn chip_reset(&mut self, active: bool) -> Result<(), Error> {
        self.memory.chip_reset(active)
    }

    fn jtag_set_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<(), Error> {
        self.memory.jtag_set_reg(reg, width, value)
    }

    fn jtag_get_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<u32, Error> {
        self.memory.jtag_get_reg(reg, width, value)
    }
}
