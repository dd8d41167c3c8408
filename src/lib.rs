//! Load, run and flash embedded targets through a JTAG debug bridge
//!
//! `debug-bridge` reaches into the memory of a target through a debug cable.
//! On top of raw memory access it can:
//!
//! - reset the target and load ELF executables into its memory
//! - resolve the runtime's well-known symbols in the loaded binaries
//! - stream raw images to flasher firmware running on the target
//! - hand the cable to external I/O loops and GDB servers
//!
//! ## As an application
//!
//! ```bash
//! debug-bridge --cable jtag-proxy --binary flasher.elf flash fs.img
//! ```
//!
//! ## As a library
//!
//! ```toml
//! debug-bridge = { version = "0.1", default-features = false }
//! ```
//!
//! We add `default-features` here to disable the `cli` feature, which is
//! enabled by default. It pulls in the command-line dependencies that a
//! library user does not need.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use self::{
    config::Config,
    error::Error,
    session::{BootMode, BridgeSession},
    transport::{MemoryTransport, SharedCable},
};

#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod cli;
pub mod config;
pub mod elf;
pub mod error;
pub mod flasher;
pub mod session;
pub mod symbols;
pub mod transport;
