use clap::{Parser, Subcommand};
use debug_bridge::cli::{
    self,
    logging::initialize_logger,
    BridgeArgs,
    FlashArgs,
    ReadArgs,
    SymbolArgs,
    WriteArgs,
};
use log::{debug, LevelFilter};
use miette::Result;

#[derive(Debug, Parser)]
#[command(about, max_term_width = 100, propagate_version = true, version)]
struct Cli {
    #[command(flatten)]
    bridge_args: BridgeArgs,

    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pulse the JTAG and chip reset lines
    Reset,
    /// Reset the target and load the configured binaries
    Load,
    /// Stream a raw image to the flasher firmware running on the target
    Flash(FlashArgs),
    /// Read a value from target memory
    Read(ReadArgs),
    /// Write a value to target memory
    Write(WriteArgs),
    /// Print the address of a symbol in the configured binaries
    Symbol(SymbolArgs),
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    // Attempt to parse any provided command-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let args = Cli::parse();

    // The configuration decides on the verbosity, so it is loaded first.
    let config = cli::load_config(&args.bridge_args)?;

    initialize_logger(if config.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    debug!("{:#?}", args);

    match args.subcommand {
        Commands::Reset => cli::reset(&config),
        Commands::Load => cli::load(&config),
        Commands::Flash(flash_args) => cli::flash(config, flash_args),
        Commands::Read(read_args) => cli::read_memory(&config, read_args),
        Commands::Write(write_args) => cli::write_memory(&config, write_args),
        Commands::Symbol(symbol_args) => cli::resolve_symbols(&config, symbol_args),
    }
}
