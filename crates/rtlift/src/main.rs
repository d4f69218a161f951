//! rtlift - lift raw x86 code to register transfer language
//!
//! Usage:
//!   rtlift archs                                  List architectures
//!   rtlift regs -A x86-real-16                    Show registers and flags
//!   rtlift lift <image> -A <arch> -b <base>       Lift the procedure at base
//!   rtlift scan <image> -A <arch> -t <address>    Find references to an address

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rtlift_arch::{ArchitectureRegistry, ProcessorArchitecture};
use rtlift_core::{Address, MemoryArea};
use std::fs;
use std::path::Path;

use commands::{LiftArgs, ScanArgs};

#[derive(Parser)]
#[command(name = "rtlift")]
#[command(about = "Lift raw machine code to register transfer language", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log diagnostics to stderr (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available architectures
    Archs,
    /// Show the registers and flags of an architecture
    Regs {
        /// Architecture name
        #[arg(short = 'A', long, default_value = "x86-protected-32")]
        arch: String,
    },
    /// Lift a procedure from a raw code image
    Lift(LiftArgs),
    /// Scan a raw image for references to known addresses
    Scan(ScanArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Archs => print_architectures(),
        Commands::Regs { arch } => print_registers(&arch)?,
        Commands::Lift(args) => commands::handle_lift_command(args)?,
        Commands::Scan(args) => commands::handle_scan_command(args)?,
    }

    Ok(())
}

/// Creates a registered architecture by name.
pub(crate) fn create_architecture(name: &str) -> Result<Box<dyn ProcessorArchitecture>> {
    ArchitectureRegistry::builtin()
        .create(name)
        .with_context(|| {
            let known: Vec<_> = ArchitectureRegistry::builtin().names().collect();
            format!("Available architectures: {}", known.join(", "))
        })
}

/// Parses an address in the architecture's textual form.
pub(crate) fn parse_address(arch: &dyn ProcessorArchitecture, text: &str) -> Result<Address> {
    let factory = arch
        .address_factory()
        .with_context(|| format!("{} cannot parse addresses", arch.name()))?;
    factory
        .parse_address(text)
        .with_context(|| format!("Invalid address: {}", text))
}

/// Reads a raw image file and maps it at `base`.
pub(crate) fn load_image(path: &Path, base: Address) -> Result<MemoryArea> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
    log::debug!("loaded {} byte(s) from {} at {}", bytes.len(), path.display(), base);
    Ok(MemoryArea::new(base, bytes))
}

/// Resolves the image path and load address shared by the image commands.
pub(crate) fn open_image(
    arch: &dyn ProcessorArchitecture,
    path: &Path,
    base: &str,
) -> Result<MemoryArea> {
    let base = parse_address(arch, base)?;
    load_image(path, base)
}

fn print_architectures() {
    println!("{:<20} Description", "Name");
    println!("{}", "=".repeat(60));
    for entry in ArchitectureRegistry::builtin().entries() {
        println!("{:<20} {}", entry.name, entry.description);
    }
}

fn print_registers(name: &str) -> Result<()> {
    let arch = create_architecture(name)?;
    let descriptor = arch.descriptor();

    println!("Architecture:  {}", descriptor.name);
    println!("Pointer size:  {} bits", descriptor.pointer_bitness.bits());
    println!("Word size:     {} bits", descriptor.word_bits);
    println!("Stack pointer: {}", descriptor.stack_register);
    println!();
    println!("{:>4}  {:<8} {:>6} {:>6}  Class", "Num", "Name", "Offset", "Bits");
    println!("{}", "-".repeat(40));
    for reg in arch.registers().iter() {
        println!(
            "{:>4}  {:<8} {:>6} {:>6}  {:?}",
            reg.number, reg.name, reg.bit_offset, reg.bit_size, reg.class
        );
    }

    let flags = arch.flags();
    println!();
    println!("Flags ({}):", flags.flag_register());
    for bit in flags.bits() {
        println!("  {}  {:#06x}", bit.letter, bit.mask);
    }
    Ok(())
}

/// Logs to stderr at a level chosen by `-v`; `RUST_LOG` overrides it.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();
}
