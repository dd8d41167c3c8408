//! Cable talking to a JTAG proxy over TCP
//!
//! Every request starts with a packed [RequestHeader]. Memory writes carry
//! their payload right after the header. The proxy answers each request with a
//! status word, followed by the read data or register value when there is one.

use std::{
    io::{BufWriter, Read, Write},
    net::TcpStream,
};

use bytemuck::{bytes_of, Pod, Zeroable};
use log::{debug, info, trace};
use strum::{FromRepr, IntoStaticStr};

use super::MemoryTransport;
use crate::error::{ConnectionError, Error};

/// Port used when the configuration doesn't name one
pub const DEFAULT_PROXY_PORT: u16 = 37539;

/// Request kinds understood by the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
#[repr(u32)]
pub enum RequestKind {
    JtagReset = 0,
    ChipReset = 1,
    Read = 2,
    Write = 3,
    SetReg = 4,
    GetReg = 5,
}

/// Fixed-size header preceding every request
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, PartialEq, Eq)]
#[repr(C, packed)]
pub struct RequestHeader {
    pub kind: u32,
    pub reg: u32,
    pub addr: u64,
    pub len: u32,
    pub value: u32,
}

impl RequestHeader {
    fn new(kind: RequestKind) -> Self {
        Self {
            kind: (kind as u32).to_le(),
            ..Default::default()
        }
    }

    fn with_reg(mut self, reg: u32) -> Self {
        self.reg = reg.to_le();
        self
    }

    fn with_addr(mut self, addr: u64) -> Self {
        self.addr = addr.to_le();
        self
    }

    fn with_len(mut self, len: u32) -> Self {
        self.len = len.to_le();
        self
    }

    fn with_value(mut self, value: u32) -> Self {
        self.value = value.to_le();
        self
    }

    /// Request kind, if the header carries a known one
    pub fn request_kind(&self) -> Option<RequestKind> {
        RequestKind::from_repr(u32::from_le(self.kind))
    }
}

/// A JTAG proxy connection
#[derive(Debug)]
pub struct JtagProxy {
    stream: TcpStream,
    peer: String,
}

impl JtagProxy {
    /// Connect to the proxy listening at `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self, Error> {
        let peer = format!("{host}:{port}");
        info!("JTAG Proxy: Connecting to ({peer})");

        let stream = TcpStream::connect(&peer).map_err(|err| Error::TransportInit {
            cable: "jtag-proxy".into(),
            reason: format!("unable to connect to {peer}: {err}"),
        })?;
        stream.set_nodelay(true).map_err(ConnectionError::from)?;

        info!("JTAG Proxy: Connected to ({peer})");

        Ok(Self { stream, peer })
    }

    /// Address of the proxy this cable is connected to
    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn send(&mut self, header: RequestHeader, payload: &[u8]) -> Result<(), Error> {
        trace!("JTAG Proxy: {:?}", header);

        let mut writer = BufWriter::new(&mut self.stream);
        writer
            .write_all(bytes_of(&header))
            .and_then(|_| writer.write_all(payload))
            .and_then(|_| writer.flush())
            .map_err(ConnectionError::from)?;

        Ok(())
    }

    fn receive_status(&mut self, kind: RequestKind) -> Result<(), Error> {
        let mut status = [0; 4];
        self.stream
            .read_exact(&mut status)
            .map_err(ConnectionError::from)?;

        match u32::from_le_bytes(status) {
            0 => Ok(()),
            status => Err(ConnectionError::ProxyStatus {
                request: kind.into(),
                status,
            }
            .into()),
        }
    }

    fn request(
        &mut self,
        kind: RequestKind,
        build: impl FnOnce(RequestHeader) -> RequestHeader,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.send(build(RequestHeader::new(kind)), payload)?;
        self.receive_status(kind)
    }
}

impl MemoryTransport for JtagProxy {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Error> {
        let len = request_len(RequestKind::Read, buf.len())?;

        self.request(RequestKind::Read, |h| h.with_addr(addr).with_len(len), &[])?;

        self.stream.read_exact(buf).map_err(ConnectionError::from)?;

        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        let len = request_len(RequestKind::Write, data.len())?;

        self.request(RequestKind::Write, |h| h.with_addr(addr).with_len(len), data)
    }

    fn jtag_reset(&mut self, active: bool) -> Result<(), Error> {
        debug!("JTAG Proxy: jtag reset {}", if active { "asserted" } else { "released" });
        self.request(RequestKind::JtagReset, |h| h.with_value(active as u32), &[])
    }

    fn chip_reset(&mut self, active: bool) -> Result<(), Error> {
        debug!("JTAG Proxy: chip reset {}", if active { "asserted" } else { "released" });
        self.request(RequestKind::ChipReset, |h| h.with_value(active as u32), &[])
    }

    fn jtag_set_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<(), Error> {
        self.request(
            RequestKind::SetReg,
            |h| h.with_reg(reg).with_len(width).with_value(value),
            &[],
        )
    }

    fn jtag_get_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<u32, Error> {
        self.request(
            RequestKind::GetReg,
            |h| h.with_reg(reg).with_len(width).with_value(value),
            &[],
        )?;

        let mut out = [0; 4];
        self.stream
            .read_exact(&mut out)
            .map_err(ConnectionError::from)?;

        Ok(u32::from_le_bytes(out))
    }
}

/// Length field of a `kind` request transferring `len` bytes
fn request_len(kind: RequestKind, len: usize) -> Result<u32, Error> {
    u32::try_from(len).map_err(|_| {
        ConnectionError::RequestTooLarge {
            request: kind.into(),
            len,
        }
        .into()
    })
}

impl Drop for JtagProxy {
    fn drop(&mut self) {
        info!("JTAG Proxy: Disconnected from ({})", self.peer);
    }
}
