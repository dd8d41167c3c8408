//! Library and application errors

use std::{io, path::PathBuf, time::Duration};

use miette::Diagnostic;
use strum::VariantNames;
use thiserror::Error;

use crate::{session::BootMode, transport::CableKind};

/// All possible errors returned by debug-bridge
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to initialize the `{cable}` cable: {reason}")]
    #[diagnostic(
        code(debug_bridge::transport_init),
        help("Check that the cable is connected and that you have permission to access it")
    )]
    TransportInit { cable: String, reason: String },

    #[error("Unknown cable: {0}")]
    #[diagnostic(
        code(debug_bridge::unknown_cable),
        help("Supported cables are: {}", CableKind::VARIANTS.join(", "))
    )]
    UnknownCable(String),

    #[error("Supplied ELF image is not valid")]
    #[diagnostic(
        code(debug_bridge::invalid_elf),
        help("Make sure the binary was built for the target and is a complete ELF executable")
    )]
    InvalidElf(#[from] ElfError),

    #[error("Boot mode `{0}` is not supported on this target")]
    #[diagnostic(
        code(debug_bridge::unsupported_mode),
        help("Remove the `boot-mode` setting to load through the default path")
    )]
    UnsupportedMode(BootMode),

    #[error("None of the symbols {names:?} could be found in the configured binaries")]
    #[diagnostic(
        code(debug_bridge::unresolved_symbol),
        help("Make sure the binary providing the symbol is listed with `--binary`")
    )]
    UnresolvedSymbol { names: Vec<String> },

    #[error("No flash image was provided")]
    #[diagnostic(
        code(debug_bridge::no_flash_image),
        help("Pass the image to flash on the command line or list it under `flash-images`")
    )]
    NoFlashImage,

    #[error("Image of {0} bytes does not fit in a single flash session")]
    #[diagnostic(code(debug_bridge::image_too_large))]
    ImageTooLarge(u64),

    #[error("Timed out after {timeout:?} waiting for the target to set the word at {addr:#x}")]
    #[diagnostic(
        code(debug_bridge::poll_timeout),
        help("Make sure the flasher firmware is running on the target")
    )]
    PollTimeout { addr: u64, timeout: Duration },

    #[error("Failed to open file: {0}")]
    #[diagnostic(code(debug_bridge::file_open))]
    FileOpenError(PathBuf, #[source] io::Error),

    #[error("Failed to read the configuration file")]
    #[diagnostic(code(debug_bridge::config))]
    Config(#[from] toml::de::Error),

    #[error("External {collaborator} failed: {reason}")]
    #[diagnostic(code(debug_bridge::collaborator))]
    Collaborator {
        collaborator: &'static str,
        reason: String,
    },

    #[error(transparent)]
    #[diagnostic(code(debug_bridge::io))]
    IoError(#[from] io::Error),

    #[error("Error while communicating with the cable")]
    #[diagnostic(transparent)]
    Connection(#[source] ConnectionError),

    #[error("Communication error while flashing the target")]
    #[diagnostic(transparent)]
    Flashing(#[source] ConnectionError),
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Self::Connection(err)
    }
}

/// Cable communication errors
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("The cable closed the connection")]
    #[diagnostic(
        code(debug_bridge::disconnected),
        help("Make sure the JTAG proxy is still running")
    )]
    Disconnected,

    #[error("The proxy rejected the {request} request with status {status}")]
    #[diagnostic(code(debug_bridge::proxy_status))]
    ProxyStatus { request: &'static str, status: u32 },

    #[error("The {request} request of {len} bytes is too large for the proxy")]
    #[diagnostic(
        code(debug_bridge::request_too_large),
        help("Split the transfer into requests of less than 4 GiB")
    )]
    RequestTooLarge { request: &'static str, len: usize },

    #[error("IO error while using the cable: {0}")]
    #[diagnostic(code(debug_bridge::cable_io))]
    Io(#[source] io::Error),
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => ConnectionError::Disconnected,
            _ => ConnectionError::Io(err),
        }
    }
}

/// Invalid ELF file error
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ElfError(String);

impl From<&'static str> for ElfError {
    fn from(err: &'static str) -> Self {
        ElfError(err.into())
    }
}

impl From<object::read::Error> for ElfError {
    fn from(err: object::read::Error) -> Self {
        ElfError(err.to_string())
    }
}

impl From<object::read::Error> for Error {
    fn from(err: object::read::Error) -> Self {
        Self::InvalidElf(err.into())
    }
}

pub(crate) trait ResultExt {
    /// Mark an error as having occurred during the flashing stage
    fn flashing(self) -> Self;
}

impl<T> ResultExt for Result<T, Error> {
    fn flashing(self) -> Self {
        match self {
            Err(Error::Connection(err)) => Err(Error::Flashing(err)),
            res => res,
        }
    }
}
