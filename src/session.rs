//! Bring up and talk to a target through a single cable
//!
//! A [BridgeSession] owns the cable for its whole lifetime. Everything that
//! needs target access, the ELF loader, the flash protocol and the external
//! loops alike, borrows it from the session.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    config::Config,
    elf::load_elf,
    error::Error,
    flasher::{FlashProtocol, PollPolicy, ProgressCallbacks},
    symbols::{
        self,
        DEBUG_STRUCT_SYMBOL,
        FLASHER_HEADER_SYMBOL,
        LEGACY_DEBUG_STRUCT_SYMBOL,
    },
    transport::{open_cable, CableGuard, MemoryTransport, SharedCable, Width},
};

/// How binaries are brought up on the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Deserialize, Serialize)]
#[serde(from = "String", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BootMode {
    /// Boot through the JTAG loader
    Jtag,
    /// Boot through the JTAG loader from HyperFlash
    JtagHyper,
    /// Reset the target and write every binary to its memory
    #[default]
    Default,
}

impl From<&str> for BootMode {
    fn from(mode: &str) -> Self {
        match mode {
            "jtag" => BootMode::Jtag,
            "jtag_hyper" => BootMode::JtagHyper,
            _ => BootMode::Default,
        }
    }
}

impl From<String> for BootMode {
    fn from(mode: String) -> Self {
        BootMode::from(mode.as_str())
    }
}

/// A running loop or server started by one of the session's collaborators
pub trait LoopHandle {
    /// Stop the loop, reporting `exit_code` to it.
    fn close(self: Box<Self>, exit_code: i32) -> Result<(), Error>;
}

/// Services started on top of a live session.
///
/// The I/O loop and the request loop exchange data with the target runtime
/// through its debug structure; the GDB server exposes the target to a
/// debugger. Each one gets its own handle on the session's cable.
pub trait Collaborators {
    fn open_ioloop(
        &mut self,
        cable: SharedCable,
        debug_struct: u64,
    ) -> Result<Box<dyn LoopHandle>, Error>;

    fn open_reqloop(
        &mut self,
        cable: SharedCable,
        debug_struct: u64,
    ) -> Result<Box<dyn LoopHandle>, Error>;

    fn open_gdb_server(&mut self, cable: SharedCable, port: u16)
        -> Result<Box<dyn LoopHandle>, Error>;
}

/// A debug session on one target
pub struct BridgeSession {
    cable: SharedCable,
    binaries: Vec<PathBuf>,
    flash_images: Vec<PathBuf>,
    boot_mode: BootMode,
    poll: PollPolicy,
    ioloop: Option<Box<dyn LoopHandle>>,
    reqloop: Option<Box<dyn LoopHandle>>,
    gdb: Option<Box<dyn LoopHandle>>,
}

impl BridgeSession {
    /// Start a session over an already opened cable.
    pub fn new(transport: Box<dyn MemoryTransport>) -> Self {
        Self {
            cable: SharedCable::new(transport),
            binaries: Vec::new(),
            flash_images: Vec::new(),
            boot_mode: BootMode::default(),
            poll: PollPolicy::default(),
            ioloop: None,
            reqloop: None,
            gdb: None,
        }
    }

    /// Open the configured cable and start a session over it.
    pub fn open(config: &Config) -> Result<Self, Error> {
        let transport = open_cable(&config.cable)?;

        Ok(Self::new(transport)
            .with_binaries(config.binaries.clone())
            .with_flash_images(config.flash_images.clone())
            .with_boot_mode(config.boot_mode)
            .with_poll_policy(config.poll.into()))
    }

    pub fn with_binaries(mut self, binaries: Vec<PathBuf>) -> Self {
        self.binaries = binaries;
        self
    }

    pub fn with_flash_images(mut self, flash_images: Vec<PathBuf>) -> Self {
        self.flash_images = flash_images;
        self
    }

    pub fn with_boot_mode(mut self, boot_mode: BootMode) -> Self {
        self.boot_mode = boot_mode;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn binaries(&self) -> &[PathBuf] {
        &self.binaries
    }

    pub fn flash_images(&self) -> &[PathBuf] {
        &self.flash_images
    }

    pub fn boot_mode(&self) -> BootMode {
        self.boot_mode
    }

    /// Another handle on the session's cable
    pub fn cable(&self) -> SharedCable {
        self.cable.clone()
    }

    /// Take exclusive access to the cable until the guard is dropped.
    pub fn lock(&self) -> CableGuard<'_> {
        self.cable.lock()
    }

    /// Pulse the JTAG reset line, then the chip reset line.
    pub fn reset(&mut self) -> Result<(), Error> {
        info!("Resetting target");

        let mut cable = self.lock();
        cable.jtag_reset(true)?;
        cable.jtag_reset(false)?;
        cable.chip_reset(true)?;
        cable.chip_reset(false)?;

        Ok(())
    }

    /// Bring the configured binaries up according to the boot mode.
    pub fn load(&mut self, progress: &mut dyn ProgressCallbacks) -> Result<(), Error> {
        match self.boot_mode {
            mode @ (BootMode::Jtag | BootMode::JtagHyper) => Err(Error::UnsupportedMode(mode)),
            BootMode::Default => self.load_default(progress),
        }
    }

    /// Reset the target and load every binary, in order.
    ///
    /// Stops at the first binary that fails to load.
    pub fn load_default(&mut self, progress: &mut dyn ProgressCallbacks) -> Result<(), Error> {
        self.reset()?;

        for binary in &self.binaries {
            let mut cable = self.cable.lock();
            load_elf(binary, &mut **cable, progress)?;
        }

        info!("Loaded {} binaries", self.binaries.len());

        Ok(())
    }

    /// Read `len` bytes starting at `addr`.
    pub fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, Error> {
        self.lock().read_vec(addr, len)
    }

    /// Write `data` starting at `addr`.
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<(), Error> {
        self.lock().write(addr, data)
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, Error> {
        self.lock().read_u8(addr)
    }

    pub fn read_u16(&self, addr: u64) -> Result<u16, Error> {
        self.lock().read_u16(addr)
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, Error> {
        self.lock().read_u32(addr)
    }

    pub fn write_u8(&self, addr: u64, value: u8) -> Result<(), Error> {
        self.lock().write_u8(addr, value)
    }

    pub fn write_u16(&self, addr: u64, value: u16) -> Result<(), Error> {
        self.lock().write_u16(addr, value)
    }

    pub fn write_u32(&self, addr: u64, value: u32) -> Result<(), Error> {
        self.lock().write_u32(addr, value)
    }

    /// Read a value of the given width, zero-extended.
    pub fn read_width(&self, addr: u64, width: Width) -> Result<u32, Error> {
        match width {
            Width::U8 => self.read_u8(addr).map(u32::from),
            Width::U16 => self.read_u16(addr).map(u32::from),
            Width::U32 => self.read_u32(addr),
        }
    }

    /// Write the low `width` bits of `value`.
    pub fn write_width(&self, addr: u64, width: Width, value: u32) -> Result<(), Error> {
        match width {
            Width::U8 => self.write_u8(addr, value as u8),
            Width::U16 => self.write_u16(addr, value as u16),
            Width::U32 => self.write_u32(addr, value),
        }
    }

    pub fn jtag_set_reg(&self, reg: u32, width: u32, value: u32) -> Result<(), Error> {
        self.lock().jtag_set_reg(reg, width, value)
    }

    pub fn jtag_get_reg(&self, reg: u32, width: u32, value: u32) -> Result<u32, Error> {
        self.lock().jtag_get_reg(reg, width, value)
    }

    /// Address of the first of `names` found in the session's binaries
    pub fn symbol_address(&self, names: &[&str]) -> Result<Option<u64>, Error> {
        symbols::resolve_any(&self.binaries, names)
    }

    /// Address of the runtime debug structure pointer
    pub fn debug_struct_address(&self) -> Result<u64, Error> {
        symbols::resolve_required(
            &self.binaries,
            &[DEBUG_STRUCT_SYMBOL, LEGACY_DEBUG_STRUCT_SYMBOL],
        )
    }

    /// Flash the first configured flash image.
    pub fn flash(&mut self, progress: &mut dyn ProgressCallbacks) -> Result<(), Error> {
        let image = self.flash_images.first().cloned().ok_or(Error::NoFlashImage)?;
        if self.flash_images.len() > 1 {
            warn!(
                "{} flash images configured, only {} is flashed",
                self.flash_images.len(),
                image.display()
            );
        }

        self.flash_image(&image, progress)
    }

    /// Flash `image` through the flasher firmware loaded on the target.
    ///
    /// The cable is locked for each step of the handshake and released while
    /// the flasher is busy, so other handles can use it mid-transfer.
    pub fn flash_image(
        &mut self,
        image: &Path,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        let header = symbols::resolve_required(&self.binaries, &[FLASHER_HEADER_SYMBOL])?;
        debug!("Flasher header at {header:#x}");

        FlashProtocol::new(self.cable.clone(), header)
            .with_poll_policy(self.poll)
            .flash_file(image, progress)
    }

    /// Start the I/O loop on the runtime debug structure.
    pub fn ioloop(&mut self, collaborators: &mut dyn Collaborators) -> Result<(), Error> {
        let debug_struct = self.debug_struct_address()?;
        debug!("Opening I/O loop on debug structure at {debug_struct:#x}");

        replace_handle(
            &mut self.ioloop,
            collaborators.open_ioloop(self.cable.clone(), debug_struct)?,
            "I/O loop",
        )
    }

    /// Start the request loop on the runtime debug structure.
    pub fn reqloop(&mut self, collaborators: &mut dyn Collaborators) -> Result<(), Error> {
        let debug_struct = self.debug_struct_address()?;
        debug!("Opening request loop on debug structure at {debug_struct:#x}");

        replace_handle(
            &mut self.reqloop,
            collaborators.open_reqloop(self.cable.clone(), debug_struct)?,
            "request loop",
        )
    }

    /// Start a GDB server listening on `port`.
    pub fn gdb(&mut self, collaborators: &mut dyn Collaborators, port: u16) -> Result<(), Error> {
        info!("Starting GDB server on port {port}");

        replace_handle(
            &mut self.gdb,
            collaborators.open_gdb_server(self.cable.clone(), port)?,
            "GDB server",
        )
    }

    /// Close the running loops.
    ///
    /// The GDB server is closed first. When an I/O loop is running, closing
    /// it ends the wait; otherwise the request loop is closed.
    pub fn wait(&mut self) -> Result<(), Error> {
        if let Some(gdb) = self.gdb.take() {
            gdb.close(0)?;
        }

        if let Some(ioloop) = self.ioloop.take() {
            return ioloop.close(0);
        }

        if let Some(reqloop) = self.reqloop.take() {
            reqloop.close(0)?;
        }

        Ok(())
    }
}

fn replace_handle(
    slot: &mut Option<Box<dyn LoopHandle>>,
    handle: Box<dyn LoopHandle>,
    what: &str,
) -> Result<(), Error> {
    if let Some(previous) = slot.replace(handle) {
        warn!("A {what} was already running, closing it");
        previous.close(0)?;
    }

    Ok(())
}
