//! Access target memory through a debug cable
//!
//! The [MemoryTransport] trait is the byte-addressable contract everything
//! else is built on: raw reads and writes at arbitrary (unaligned) addresses,
//! the two reset lines, and the width-tagged JTAG scratch registers. How the
//! bits reach the chain is up to the cable implementing it.
//!
//! Cables are selected with a configuration string such as `jtag-proxy` or
//! `ftdi@digilent`; see [CableKind] and [open_cable].

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::debug;
use strum::{Display, EnumString, VariantNames};

use crate::{config::CableConfig, error::Error};

pub mod dummy;
pub mod proxy;

pub use self::{dummy::DummyCable, proxy::JtagProxy};

/// Byte-level access to the memory and reset lines of a target
pub trait MemoryTransport: Send {
    /// Fill `buf` with the bytes starting at `addr`.
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Error>;

    /// Write `data` starting at `addr`.
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Error>;

    /// Drive the JTAG (TAP) reset line; `true` asserts it.
    fn jtag_reset(&mut self, active: bool) -> Result<(), Error>;

    /// Drive the chip reset line; `true` asserts it.
    fn chip_reset(&mut self, active: bool) -> Result<(), Error>;

    /// Write a width-tagged JTAG scratch register.
    fn jtag_set_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<(), Error>;

    /// Read a width-tagged JTAG scratch register, shifting `value` in while
    /// the current content is captured.
    fn jtag_get_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<u32, Error>;

    /// Read `len` bytes starting at `addr`.
    fn read_vec(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0; len];
        self.read(addr, &mut buf)?;

        Ok(buf)
    }

    fn read_u8(&mut self, addr: u64) -> Result<u8, Error> {
        let mut buf = [0; 1];
        self.read(addr, &mut buf)?;

        Ok(buf[0])
    }

    fn read_u16(&mut self, addr: u64) -> Result<u16, Error> {
        let mut buf = [0; 2];
        self.read(addr, &mut buf)?;

        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self, addr: u64) -> Result<u32, Error> {
        let mut buf = [0; 4];
        self.read(addr, &mut buf)?;

        Ok(u32::from_le_bytes(buf))
    }

    fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), Error> {
        self.write(addr, &[value])
    }

    fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), Error> {
        self.write(addr, &value.to_le_bytes())
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), Error> {
        self.write(addr, &value.to_le_bytes())
    }
}

impl<T: MemoryTransport + ?Sized> MemoryTransport for Box<T> {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Error> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        (**self).write(addr, data)
    }

    fn jtag_reset(&mut self, active: bool) -> Result<(), Error> {
        (**self).jtag_reset(active)
    }

    fn chip_reset(&mut self, active: bool) -> Result<(), Error> {
        (**self).chip_reset(active)
    }

    fn jtag_set_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<(), Error> {
        (**self).jtag_set_reg(reg, width, value)
    }

    fn jtag_get_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<u32, Error> {
        (**self).jtag_get_reg(reg, width, value)
    }
}

/// Register width used by the typed accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, VariantNames)]
pub enum Width {
    #[strum(serialize = "8")]
    U8,
    #[strum(serialize = "16")]
    U16,
    #[strum(serialize = "32")]
    U32,
}

impl Width {
    /// Number of bytes covered by this width.
    pub const fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
        }
    }
}

/// Supported cable kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, VariantNames)]
#[strum(serialize_all = "kebab-case")]
pub enum CableKind {
    /// TCP connection to a JTAG proxy
    JtagProxy,
    /// FTDI-based USB JTAG adapter
    Ftdi,
    /// In-memory target, for simulation
    Dummy,
}

/// A parsed cable selector such as `ftdi@digilent`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CableSelector {
    pub kind: CableKind,
    /// Kind-specific device description following the `@`
    pub device: Option<String>,
}

impl FromStr for CableSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, device) = match s.split_once('@') {
            Some((kind, device)) => (kind, Some(device.to_string())),
            None => (s, None),
        };

        let kind = CableKind::from_str(kind).map_err(|_| Error::UnknownCable(s.to_string()))?;

        Ok(CableSelector { kind, device })
    }
}

impl fmt::Display for CableSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{}@{}", self.kind, device),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Open the cable described by `config`.
pub fn open_cable(config: &CableConfig) -> Result<Box<dyn MemoryTransport>, Error> {
    let selector = config
        .kind
        .as_deref()
        .ok_or_else(|| Error::TransportInit {
            cable: "<none>".into(),
            reason: "no cable was specified".into(),
        })?
        .parse::<CableSelector>()?;

    debug!("Opening cable: {selector}");

    match selector.kind {
        CableKind::JtagProxy => {
            let proxy = config.jtag_proxy.as_ref().ok_or_else(|| Error::TransportInit {
                cable: selector.to_string(),
                reason: "didn't find any information for the JTAG proxy".into(),
            })?;

            Ok(Box::new(JtagProxy::connect(&proxy.host, proxy.port)?))
        }
        CableKind::Dummy => Ok(Box::new(DummyCable::new())),
        CableKind::Ftdi => Err(Error::TransportInit {
            cable: selector.to_string(),
            reason: "no FTDI driver is built into this binary, use a JTAG proxy instead".into(),
        }),
    }
}

/// A cable shared between the session and its collaborators.
///
/// Cloning the handle does not open a new cable. [SharedCable::lock] gives
/// exclusive access until the returned guard is dropped.
#[derive(Clone)]
pub struct SharedCable {
    inner: Arc<Mutex<Box<dyn MemoryTransport>>>,
}

/// Exclusive access to a [SharedCable]; dropping it releases the lock.
pub type CableGuard<'a> = MutexGuard<'a, Box<dyn MemoryTransport>>;

impl SharedCable {
    pub fn new(transport: Box<dyn MemoryTransport>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    /// Block until no one else holds the cable, then take it.
    pub fn lock(&self) -> CableGuard<'_> {
        // A panic while holding the guard leaves the cable usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Short-lived exclusive access to a cable.
///
/// Protocols that run for a long time take the cable once per group of
/// operations that must not be interleaved, rather than for their whole run.
pub trait CableAccess {
    /// Run `f` with exclusive access to the cable.
    fn with<R>(
        &mut self,
        f: impl FnOnce(&mut dyn MemoryTransport) -> Result<R, Error>,
    ) -> Result<R, Error>;
}

impl<T: MemoryTransport> CableAccess for &mut T {
    fn with<R>(
        &mut self,
        f: impl FnOnce(&mut dyn MemoryTransport) -> Result<R, Error>,
    ) -> Result<R, Error> {
        f(&mut **self)
    }
}

impl CableAccess for SharedCable {
    fn with<R>(
        &mut self,
        f: impl FnOnce(&mut dyn MemoryTransport) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut cable = self.lock();
        f(&mut **cable)
    }
}

impl fmt::Debug for SharedCable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCable")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}
