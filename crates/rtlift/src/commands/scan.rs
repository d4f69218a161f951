//! Scanning a raw image for references to known addresses.

use anyhow::{bail, Context, Result};
use clap::Args;
use rtlift_arch::PointerScannerFlags;
use rtlift_core::{ImageSegment, SegmentAccess, SegmentMap};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::{create_architecture, open_image, parse_address};

/// Arguments of `rtlift scan`.
#[derive(Args)]
pub struct ScanArgs {
    /// Path to the raw code image
    image: PathBuf,

    /// Architecture name
    #[arg(short = 'A', long, default_value = "x86-protected-32")]
    arch: String,

    /// Load address of the image
    #[arg(short, long)]
    base: String,

    /// Addresses to look for
    #[arg(short, long, required = true)]
    target: Vec<String>,

    /// Match absolute pointers
    #[arg(long)]
    pointers: bool,

    /// Match relative calls
    #[arg(long)]
    calls: bool,

    /// Match relative jumps
    #[arg(long)]
    jumps: bool,
}

impl ScanArgs {
    fn flags(&self) -> PointerScannerFlags {
        let mut flags = PointerScannerFlags::empty();
        flags.set(PointerScannerFlags::POINTERS, self.pointers);
        flags.set(PointerScannerFlags::CALLS, self.calls);
        flags.set(PointerScannerFlags::JUMPS, self.jumps);
        if flags.is_empty() {
            PointerScannerFlags::ALL
        } else {
            flags
        }
    }
}

/// Handle `rtlift scan`.
pub fn handle_scan_command(args: ScanArgs) -> Result<()> {
    let arch = create_architecture(&args.arch)?;
    let Some(scanning) = arch.pointer_scanning() else {
        bail!("{} does not support pointer scanning", arch.name());
    };
    let mem = open_image(arch.as_ref(), &args.image, &args.base)?;

    let known = args
        .target
        .iter()
        .map(|t| parse_address(arch.as_ref(), t))
        .collect::<Result<HashSet<_>>>()?;

    // The whole image is treated as one executable segment.
    let mut segments = SegmentMap::new();
    segments.add(ImageSegment::new(
        "image",
        mem.clone(),
        SegmentAccess::READ | SegmentAccess::EXECUTE,
    ));

    let rdr = arch
        .create_image_reader(&mem, mem.base)
        .context("Failed to read image")?;
    let mut hits = 0usize;
    for addr in scanning.create_pointer_scanner(&segments, rdr, &known, args.flags()) {
        println!("{}", addr);
        hits += 1;
    }
    log::info!("{} reference(s) found", hits);
    Ok(())
}
