//! Stream raw images to flasher firmware running on the target
//!
//! The flasher publishes a [FlasherHeader] in its memory under the
//! `flasherHeader` symbol. The host fills a target-owned buffer one chunk at a
//! time and the two sides take turns through a pair of ready flags in that
//! header:
//!
//! 1. The host waits for the flasher to raise `flasher_ready`.
//! 2. It reads the buffer address published by the flasher, then writes the
//!    flash address and the number of chunks that will follow.
//! 3. For every chunk it writes the data into the buffer, publishes the chunk
//!    size, raises `image_ready` and clears `flasher_ready`.
//! 4. Unless it was the last chunk, it waits for `flasher_ready` again.
//!
//! There is never more than one chunk the flasher hasn't acknowledged.

use std::{
    fs::File,
    io::{BufReader, Read},
    mem::offset_of,
    path::Path,
};

use log::{debug, info};

pub use self::poll::PollPolicy;
use crate::{
    error::{Error, ResultExt},
    transport::CableAccess,
};

mod poll;

/// Largest chunk the flasher firmware accepts in its buffer
pub const MAX_CHUNK_SIZE: u32 = 350 * 1024;

/// Control block shared with the flasher firmware.
///
/// Every field is a little-endian 32-bit word. `buffer_addr` is written by the
/// firmware, everything else by the host.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FlasherHeader {
    pub image_ready: u32,
    pub flasher_ready: u32,
    pub flash_addr: u32,
    pub iterations: u32,
    pub buffer_size: u32,
    pub buffer_addr: u32,
}

impl FlasherHeader {
    pub const IMAGE_READY_OFFSET: u64 = offset_of!(FlasherHeader, image_ready) as u64;
    pub const FLASHER_READY_OFFSET: u64 = offset_of!(FlasherHeader, flasher_ready) as u64;
    pub const FLASH_ADDR_OFFSET: u64 = offset_of!(FlasherHeader, flash_addr) as u64;
    pub const ITERATIONS_OFFSET: u64 = offset_of!(FlasherHeader, iterations) as u64;
    pub const BUFFER_SIZE_OFFSET: u64 = offset_of!(FlasherHeader, buffer_size) as u64;
    pub const BUFFER_ADDR_OFFSET: u64 = offset_of!(FlasherHeader, buffer_addr) as u64;
}

/// Target addresses of the fields of a [FlasherHeader] placed at `base`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderAddrs {
    base: u64,
}

impl HeaderAddrs {
    pub fn new(base: u64) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn image_ready(&self) -> u64 {
        self.base + FlasherHeader::IMAGE_READY_OFFSET
    }

    pub fn flasher_ready(&self) -> u64 {
        self.base + FlasherHeader::FLASHER_READY_OFFSET
    }

    pub fn flash_addr(&self) -> u64 {
        self.base + FlasherHeader::FLASH_ADDR_OFFSET
    }

    pub fn iterations(&self) -> u64 {
        self.base + FlasherHeader::ITERATIONS_OFFSET
    }

    pub fn buffer_size(&self) -> u64 {
        self.base + FlasherHeader::BUFFER_SIZE_OFFSET
    }

    pub fn buffer_addr(&self) -> u64 {
        self.base + FlasherHeader::BUFFER_ADDR_OFFSET
    }
}

/// How an image of a given size is cut into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    size: u64,
    chunk_size: u32,
}

impl ChunkPlan {
    pub fn new(size: u64) -> Self {
        Self::with_chunk_size(size, MAX_CHUNK_SIZE)
    }

    /// `chunk_size` must not be zero.
    pub fn with_chunk_size(size: u64, chunk_size: u32) -> Self {
        debug_assert!(chunk_size > 0);

        Self { size, chunk_size }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of chunks, i.e. `ceil(size / chunk_size)`
    pub fn iterations(&self) -> u64 {
        self.size.div_ceil(u64::from(self.chunk_size))
    }

    /// Length of the trailing short chunk, 0 when the size is an exact
    /// multiple of the chunk size
    pub fn last_size(&self) -> u32 {
        (self.size % u64::from(self.chunk_size)) as u32
    }

    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        let iterations = self.iterations();

        (0..iterations).map(move |index| {
            let last = index + 1 == iterations;
            let len = match self.last_size() {
                short if last && short != 0 => short,
                _ => self.chunk_size,
            };

            Chunk { index, len, last }
        })
    }
}

/// A single chunk of a [ChunkPlan]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: u64,
    /// Exact number of image bytes in the chunk
    pub len: u32,
    pub last: bool,
}

impl Chunk {
    /// Value published in the buffer size field.
    ///
    /// Rounded up to a whole number of words even though only `len` bytes
    /// are written to the buffer. Existing firmware depends on this.
    pub fn buffer_size(&self) -> u32 {
        padded_len(self.len)
    }
}

/// Round `len` up to a multiple of 4.
pub const fn padded_len(len: u32) -> u32 {
    (len + 3) & !3
}

/// Progress update callbacks.
pub trait ProgressCallbacks {
    /// Initialize some progress report.
    fn init(&mut self, addr: u64, total: usize);
    /// Update some progress report.
    fn update(&mut self, current: usize);
    /// Finish some progress report.
    fn finish(&mut self);
}

/// An empty implementation of [ProgressCallbacks] that does nothing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultProgressCallback;

impl ProgressCallbacks for DefaultProgressCallback {
    fn init(&mut self, _addr: u64, _total: usize) {}
    fn update(&mut self, _current: usize) {}
    fn finish(&mut self) {}
}

/// Host side of the flashing handshake.
///
/// The cable is only taken for the initial header writes, for each chunk's
/// group of writes and for each poll of the ready flag. Other users of a
/// shared cable get their turn while the flasher is busy.
pub struct FlashProtocol<C> {
    cable: C,
    header: HeaderAddrs,
    poll: PollPolicy,
    chunk_size: u32,
}

impl<C: CableAccess> FlashProtocol<C> {
    /// Drive the flasher whose header lives at `header_addr`.
    pub fn new(cable: C, header_addr: u64) -> Self {
        Self {
            cable,
            header: HeaderAddrs::new(header_addr),
            poll: PollPolicy::default(),
            chunk_size: MAX_CHUNK_SIZE,
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Use chunks smaller than [MAX_CHUNK_SIZE], for firmware with a smaller
    /// buffer. Zero is ignored.
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        if chunk_size > 0 {
            self.chunk_size = chunk_size.min(MAX_CHUNK_SIZE);
        }
        self
    }

    /// Stream the image at `path` to the flasher.
    pub fn flash_file(
        &mut self,
        path: &Path,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        info!("Flashing image from {}", path.display());

        let file = File::open(path).map_err(|e| Error::FileOpenError(path.to_path_buf(), e))?;
        let size = file
            .metadata()
            .map_err(|e| Error::FileOpenError(path.to_path_buf(), e))?
            .len();

        self.run(BufReader::new(file), size, progress)
    }

    /// Stream `size` bytes read from `image` to the flasher.
    pub fn run<R: Read>(
        &mut self,
        image: R,
        size: u64,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        self.transfer(image, size, progress).flashing()
    }

    fn transfer<R: Read>(
        &mut self,
        mut image: R,
        size: u64,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        let plan = ChunkPlan::with_chunk_size(size, self.chunk_size);
        let iterations =
            u32::try_from(plan.iterations()).map_err(|_| Error::ImageTooLarge(size))?;

        debug!(
            "Flashing {size} bytes in {iterations} chunks through header at {:#x}",
            self.header.base()
        );

        self.wait_flasher_ready()?;

        let header = self.header;
        let buffer = self.cable.with(|t| {
            let buffer = u64::from(t.read_u32(header.buffer_addr())?);
            t.write_u32(header.flash_addr(), 0)?;
            t.write_u32(header.iterations(), iterations)?;

            Ok(buffer)
        })?;
        info!("Flash address buffer {buffer:#x}");

        progress.init(buffer, size as usize);

        let mut data = vec![0; plan.chunks().next().map_or(0, |c| c.len as usize)];
        let mut written = 0;

        for chunk in plan.chunks() {
            let data = &mut data[..chunk.len as usize];
            image.read_exact(data)?;

            debug!(
                "Sending chunk {}/{iterations} ({} bytes)",
                chunk.index + 1,
                chunk.len
            );

            self.cable.with(|t| {
                t.write(buffer, &*data)?;
                t.write_u32(header.buffer_size(), chunk.buffer_size())?;
                t.write_u32(header.image_ready(), 1)?;
                t.write_u32(header.flasher_ready(), 0)
            })?;

            written += data.len();
            progress.update(written);

            if !chunk.last {
                self.wait_flasher_ready()?;
            }
        }

        progress.finish();
        info!("Flashed {written} bytes");

        Ok(())
    }

    fn wait_flasher_ready(&mut self) -> Result<u32, Error> {
        let cable = &mut self.cable;

        self.poll
            .wait_nonzero(self.header.flasher_ready(), |addr| {
                cable.with(|t| t.read_u32(addr))
            })
    }
}
