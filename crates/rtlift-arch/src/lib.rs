//! # rtlift-arch
//!
//! The processor architecture contract of rtlift and its x86 back end.
//!
//! An architecture is a [`ProcessorArchitecture`]: immutable register and
//! flag tables plus optional capabilities (address factory, disassembler,
//! rewriter, pointer scanner) reached through narrow traits. Architectures
//! are created by name from an [`ArchitectureRegistry`]; the [`lift`]
//! module drives a rewriter over whole procedures.

pub mod descriptor;
pub mod error;
pub mod lift;
pub mod options;
pub mod registry;
pub mod scanner;
pub mod state;
pub mod traits;
pub mod x86;

pub use descriptor::ArchitectureDescriptor;
pub use error::{ArchError, DecodeError, LiftError, RewriteError};
pub use lift::{
    lift_procedure, lift_procedures_parallel, LiftConfig, LiftedProcedure, UnsupportedPolicy,
};
pub use options::{OptionValue, ProcessorOptions, UserOptions};
pub use registry::{ArchitectureRegistry, RegistryEntry};
pub use scanner::{PointerScanner, PointerScannerFlags, ReferenceMatcher};
pub use state::{CallEffects, CallSite, ProcessorState, RegisterState};
pub use traits::{
    AddressFactory, DisassemblerFactory, DisassemblyStream, NullHost, PointerScanning,
    ProcessorArchitecture, RewriterFactory, RewriterHost, RtlStream,
};
