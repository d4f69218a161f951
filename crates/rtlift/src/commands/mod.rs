//! Command handlers for the rtlift CLI.
//!
//! Each submodule handles one subcommand that works on a raw code image.

pub mod lift;
pub mod scan;

pub use lift::{handle_lift_command, LiftArgs};
pub use scan::{handle_scan_command, ScanArgs};
