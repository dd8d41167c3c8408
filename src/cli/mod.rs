//! Command-line interface helpers
//!
//! No stability guaranties apply

use std::path::PathBuf;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use miette::{bail, Result};

use crate::{
    config::Config,
    flasher::ProgressCallbacks,
    session::{BootMode, BridgeSession},
    symbols,
    transport::Width,
};

pub mod logging;

/// Options selecting the target and what is loaded on it
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct BridgeArgs {
    /// Configuration file to use instead of searching for `debug_bridge.toml`
    #[arg(long, env = "DEBUG_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Cable connected to the target, e.g. `jtag-proxy`, `dummy` or `ftdi@digilent`
    #[arg(long, env = "DEBUG_BRIDGE_CABLE")]
    pub cable: Option<String>,
    /// Boot mode: `jtag`, `jtag_hyper` or `default`
    #[arg(long)]
    pub boot_mode: Option<String>,
    /// ELF binary to load on the target, may be repeated
    #[arg(long = "binary", value_name = "ELF")]
    pub binaries: Vec<PathBuf>,
    /// Enable debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Flash a raw image through the flasher firmware
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct FlashArgs {
    /// Image to flash, defaults to the first configured flash image
    pub image: Option<PathBuf>,
    /// Don't reset and load the binaries before flashing
    #[arg(long)]
    pub skip_load: bool,
    /// Milliseconds to pause between two reads of the flasher ready flag
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,
    /// Give up when the flasher doesn't answer within this many milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_timeout_ms: Option<u64>,
}

/// Read a value from target memory
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct ReadArgs {
    /// Address to read from
    #[arg(value_parser = parse_int::<u64>)]
    pub addr: u64,
    /// Access width in bits
    #[arg(long, default_value_t = Width::U32)]
    pub width: Width,
}

/// Write a value to target memory
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct WriteArgs {
    /// Address to write to
    #[arg(value_parser = parse_int::<u64>)]
    pub addr: u64,
    /// Value to write
    #[arg(value_parser = parse_int::<u32>)]
    pub value: u32,
    /// Access width in bits
    #[arg(long, default_value_t = Width::U32)]
    pub width: Width,
}

/// Resolve symbols in the configured binaries
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct SymbolArgs {
    /// Symbol names, later names are only tried when earlier ones are missing
    #[arg(required = true)]
    pub names: Vec<String>,
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer that fits in `T`
pub fn parse_int<T: TryFrom<u64>>(input: &str) -> Result<T, String> {
    let value = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => input.parse(),
    }
    .map_err(|err| err.to_string())?;

    T::try_from(value).map_err(|_| format!("{input} is out of range"))
}

/// Load the configuration and apply the command-line overrides on top of it
pub fn load_config(args: &BridgeArgs) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(cable) = &args.cable {
        config.cable.kind = Some(cable.clone());
    }
    if let Some(mode) = &args.boot_mode {
        config.boot_mode = BootMode::from(mode.as_str());
    }
    if !args.binaries.is_empty() {
        config.binaries = args.binaries.clone();
    }
    config.verbose |= args.verbose;

    Ok(config)
}

/// Reset the target
pub fn reset(config: &Config) -> Result<()> {
    let mut session = BridgeSession::open(config)?;
    session.reset()?;

    Ok(())
}

/// Reset the target and load every configured binary
pub fn load(config: &Config) -> Result<()> {
    let mut session = BridgeSession::open(config)?;
    session.load(&mut DebugBridgeProgress::default())?;

    info!("Target loaded");

    Ok(())
}

/// Load the flasher firmware, unless asked not to, then flash an image
pub fn flash(mut config: Config, args: FlashArgs) -> Result<()> {
    if let Some(interval) = args.poll_interval_ms {
        config.poll.interval_ms = interval;
    }
    if let Some(timeout) = args.poll_timeout_ms {
        config.poll.timeout_ms = Some(timeout);
    }

    let mut session = BridgeSession::open(&config)?;
    let mut progress = DebugBridgeProgress::default();

    if !args.skip_load {
        session.load(&mut progress)?;
    }

    match args.image {
        Some(image) => session.flash_image(&image, &mut progress)?,
        None => session.flash(&mut progress)?,
    }

    info!("Flashing has completed!");

    Ok(())
}

/// Read a value and print it
pub fn read_memory(config: &Config, args: ReadArgs) -> Result<()> {
    let session = BridgeSession::open(config)?;
    let value = session.read_width(args.addr, args.width)?;

    println!(
        "{:#x}: {:#0width$x}",
        args.addr,
        value,
        width = 2 + 2 * args.width.bytes()
    );

    Ok(())
}

/// Write a value
pub fn write_memory(config: &Config, args: WriteArgs) -> Result<()> {
    let bits = 8 * args.width.bytes();
    if bits < 32 && args.value >> bits != 0 {
        bail!(
            "Value {:#x} does not fit in {} bits",
            args.value,
            args.width
        );
    }

    let session = BridgeSession::open(config)?;
    session.write_width(args.addr, args.width, args.value)?;

    Ok(())
}

/// Resolve symbols and print their address
pub fn resolve_symbols(config: &Config, args: SymbolArgs) -> Result<()> {
    let names: Vec<&str> = args.names.iter().map(String::as_str).collect();
    let addr = symbols::resolve_required(&config.binaries, &names)?;

    println!("{addr:#x}");

    Ok(())
}

/// Progress callback implementations for use in `cli` tools
#[derive(Default)]
pub struct DebugBridgeProgress {
    pb: Option<ProgressBar>,
}

impl ProgressCallbacks for DebugBridgeProgress {
    /// Initialize the progress bar
    fn init(&mut self, addr: u64, len: usize) {
        let style = ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40}] {pos:>7}/{len:7} {msg}",
        )
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

        let pb = ProgressBar::new(len as u64)
            .with_message(format!("{addr:#X}"))
            .with_style(style);

        self.pb = Some(pb);
    }

    /// Update the progress bar
    fn update(&mut self, current: usize) {
        if let Some(ref pb) = self.pb {
            pb.set_position(current as u64);
        }
    }

    /// End the progress bar
    fn finish(&mut self) {
        if let Some(ref pb) = self.pb {
            pb.finish();
        }
    }
}
