//! Load ELF executables into target memory
//!
//! Every `PT_LOAD` segment is written at its physical address. When a
//! segment occupies more memory than the file provides (`.bss` and friends),
//! the remainder is explicitly zeroed on the target.

use std::{fs, path::Path};

use log::{debug, info};
use object::{
    elf::PT_LOAD,
    read::elf::{ElfFile, ElfFile32, ElfFile64, FileHeader, ProgramHeader},
    Endianness,
    FileKind,
};

use crate::{
    error::{ElfError, Error},
    flasher::ProgressCallbacks,
    transport::MemoryTransport,
};

/// Largest single write used to clear the memory-only part of a segment
pub const ZERO_FILL_BLOCK: usize = 64 * 1024;

/// A loadable segment of an ELF image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSegment<'a> {
    /// Physical address the segment is loaded at
    pub addr: u64,
    /// Bytes backed by the file
    pub data: &'a [u8],
    /// Size of the segment in memory, at least `data.len()`
    pub mem_size: u64,
}

impl LoadSegment<'_> {
    /// Start address and length of the region that must be zeroed after the
    /// file-backed bytes, if there is one.
    pub fn zero_fill(&self) -> Option<(u64, u64)> {
        let file_size = self.data.len() as u64;
        let size = self.mem_size.checked_sub(file_size).filter(|size| *size > 0)?;

        Some((self.addr.checked_add(file_size)?, size))
    }
}

/// The loadable part of an ELF executable
#[derive(Debug)]
pub struct ElfImage<'a> {
    entry: u64,
    segments: Vec<LoadSegment<'a>>,
}

impl<'a> ElfImage<'a> {
    /// Parse the program header table of a 32- or 64-bit ELF image.
    pub fn parse(data: &'a [u8]) -> Result<Self, Error> {
        match FileKind::parse(data)? {
            FileKind::Elf32 => Self::from_elf(&ElfFile32::<Endianness>::parse(data)?, data),
            FileKind::Elf64 => Self::from_elf(&ElfFile64::<Endianness>::parse(data)?, data),
            _ => Err(ElfError::from("not an ELF executable").into()),
        }
    }

    fn from_elf<Elf>(elf: &ElfFile<'a, Elf>, data: &'a [u8]) -> Result<Self, Error>
    where
        Elf: FileHeader<Endian = Endianness>,
    {
        let endian = elf.endian();
        let mut segments = Vec::new();

        for header in elf.elf_program_headers() {
            if header.p_type(endian) != PT_LOAD {
                continue;
            }

            let file_size: u64 = header.p_filesz(endian).into();
            let mem_size: u64 = header.p_memsz(endian).into();
            if mem_size < file_size {
                return Err(ElfError::from("segment is smaller in memory than in the file").into());
            }

            let data = header
                .data(endian, data)
                .map_err(|_| ElfError::from("segment data lies outside of the file"))?;

            let addr: u64 = header.p_paddr(endian).into();
            if addr.checked_add(mem_size).is_none() {
                return Err(
                    ElfError::from("segment extends past the end of the address space").into(),
                );
            }

            segments.push(LoadSegment {
                addr,
                data,
                mem_size,
            });
        }

        Ok(Self {
            entry: elf.elf_header().e_entry(endian).into(),
            segments,
        })
    }

    /// Entry point of the executable
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// Loadable segments, in program header order
    pub fn segments(&self) -> &[LoadSegment<'a>] {
        &self.segments
    }
}

/// Write every loadable segment of `data` to the target.
pub fn load_elf_data(
    data: &[u8],
    transport: &mut dyn MemoryTransport,
    progress: &mut dyn ProgressCallbacks,
) -> Result<(), Error> {
    let image = ElfImage::parse(data)?;

    for segment in image.segments() {
        write_segment(transport, segment, progress)?;
    }

    Ok(())
}

/// Read the ELF executable at `path` and write it to the target.
pub fn load_elf(
    path: &Path,
    transport: &mut dyn MemoryTransport,
    progress: &mut dyn ProgressCallbacks,
) -> Result<(), Error> {
    info!("Loading binary from {}", path.display());

    let data = fs::read(path).map_err(|e| Error::FileOpenError(path.to_path_buf(), e))?;

    load_elf_data(&data, transport, progress)
}

fn write_segment(
    transport: &mut dyn MemoryTransport,
    segment: &LoadSegment<'_>,
    progress: &mut dyn ProgressCallbacks,
) -> Result<(), Error> {
    progress.init(segment.addr, segment.mem_size as usize);

    if !segment.data.is_empty() {
        debug!(
            "Loading segment (base: {:#x}, size: {:#x})",
            segment.addr,
            segment.data.len()
        );
        transport.write(segment.addr, segment.data)?;
        progress.update(segment.data.len());
    }

    if let Some((addr, size)) = segment.zero_fill() {
        debug!("Zero-filling segment (base: {addr:#x}, size: {size:#x})");

        let zeros = [0; ZERO_FILL_BLOCK];
        let mut done = 0;
        while done < size {
            let len = (size - done).min(ZERO_FILL_BLOCK as u64);
            transport.write(addr + done, &zeros[..len as usize])?;

            done += len;
            progress.update((segment.data.len() as u64 + done) as usize);
        }
    }

    progress.finish();

    Ok(())
}
