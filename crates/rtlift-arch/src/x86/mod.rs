//! x86 back end: real-mode 16-bit and protected-mode 32-bit.

mod decoder;
mod matcher;
mod modrm;
mod prefix;
pub mod registers;
mod rewriter;
mod state;

pub use decoder::{DecodedInstruction, X86Decoder, X86Disassembly, MAX_INSTRUCTION_LENGTH};
pub use matcher::X86ReferenceMatcher;
pub use rewriter::X86Rewriter;
pub use state::X86State;

use crate::scanner::PointerScanner;
use crate::{
    AddressFactory, ArchError, ArchitectureDescriptor, DisassemblerFactory, DisassemblyStream,
    OptionValue, PointerScannerFlags, PointerScanning, ProcessorArchitecture, ProcessorState,
    RewriterFactory, RewriterHost, RtlStream, UserOptions,
};
use rtlift_core::{Address, Constant, Expression, Frame, ImageReader, SegmentMap};
use std::collections::HashSet;
use std::sync::Arc;

/// Key of the processor mode in the user options.
pub const MODE_OPTION: &str = "mode";

/// Operating mode of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorMode {
    /// 16-bit segmented addressing.
    Real16,
    /// 32-bit flat addressing.
    Protected32,
}

impl ProcessorMode {
    /// Returns the registry name of the architecture in this mode.
    pub fn architecture_name(&self) -> &'static str {
        match self {
            Self::Real16 => "x86-real-16",
            Self::Protected32 => "x86-protected-32",
        }
    }

    /// Returns the default operand and address size.
    pub fn default_bits(&self) -> u16 {
        match self {
            Self::Real16 => 16,
            Self::Protected32 => 32,
        }
    }

    /// Returns the value stored under [`MODE_OPTION`].
    pub fn option_value(&self) -> &'static str {
        match self {
            Self::Real16 => "real16",
            Self::Protected32 => "protected32",
        }
    }

    /// Parses a mode option value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "real16" | "real" | "16" => Some(Self::Real16),
            "protected32" | "protected" | "32" => Some(Self::Protected32),
            _ => None,
        }
    }
}

/// The x86 processor architecture.
#[derive(Debug, Clone)]
pub struct X86Architecture {
    mode: ProcessorMode,
    descriptor: Arc<ArchitectureDescriptor>,
    /// Options this architecture does not interpret but must persist.
    extra_options: UserOptions,
}

impl X86Architecture {
    pub fn new(mode: ProcessorMode) -> Self {
        Self {
            mode,
            descriptor: registers::descriptor(mode),
            extra_options: UserOptions::new(),
        }
    }

    pub fn mode(&self) -> ProcessorMode {
        self.mode
    }

    pub fn decoder(&self) -> X86Decoder {
        X86Decoder::new(self.mode)
    }

    fn set_mode(&mut self, mode: ProcessorMode) {
        self.mode = mode;
        self.descriptor = registers::descriptor(mode);
    }
}

impl ProcessorArchitecture for X86Architecture {
    fn descriptor(&self) -> &Arc<ArchitectureDescriptor> {
        &self.descriptor
    }

    fn create_processor_state(&self) -> Box<dyn ProcessorState> {
        Box::new(X86State::new(self.descriptor.clone()))
    }

    /// Real-mode stack accesses go through `ss`.
    fn create_stack_access(&self, offset: i32, bits: u16) -> Expression {
        let sp = self.stack_register();
        let address = Expression::add(Expression::Register(sp), offset as i64, sp.bit_size);
        match self.mode {
            ProcessorMode::Real16 => Expression::seg_mem(registers::SS, address, bits),
            ProcessorMode::Protected32 => Expression::mem(address, bits),
        }
    }

    fn address_factory(&self) -> Option<&dyn AddressFactory> {
        Some(self)
    }

    fn disassembler_factory(&self) -> Option<&dyn DisassemblerFactory> {
        Some(self)
    }

    fn rewriter_factory(&self) -> Option<&dyn RewriterFactory> {
        Some(self)
    }

    fn pointer_scanning(&self) -> Option<&dyn PointerScanning> {
        Some(self)
    }

    fn save_user_options(&self) -> UserOptions {
        let mut options = self.extra_options.clone();
        options.insert(MODE_OPTION.to_string(), OptionValue::from(self.mode.option_value()));
        options
    }

    fn load_user_options(&mut self, options: &UserOptions) -> Result<(), ArchError> {
        let mut extra = options.clone();
        if let Some(value) = extra.remove(MODE_OPTION) {
            let mode = value
                .as_item()
                .and_then(ProcessorMode::parse)
                .ok_or_else(|| ArchError::invalid_option(MODE_OPTION, "expected real16 or protected32"))?;
            self.set_mode(mode);
        }
        self.extra_options = extra;
        Ok(())
    }
}

impl AddressFactory for X86Architecture {
    fn make_address_from_constant(&self, c: Constant) -> rtlift_core::Result<Address> {
        let value = c
            .as_u64()
            .ok_or_else(|| rtlift_core::Error::InvalidAddress(c.to_string()))?;
        Address::linear(value, self.pointer_bitness())
    }

    fn make_segmented_address(&self, selector: u64, offset: u64) -> rtlift_core::Result<Address> {
        Address::segmented(selector, offset)
    }

    fn parse_address(&self, text: &str) -> rtlift_core::Result<Address> {
        Address::parse_with(text, self.pointer_bitness())
    }
}

impl DisassemblerFactory for X86Architecture {
    fn create_disassembler<'a>(&'a self, rdr: ImageReader<'a>) -> DisassemblyStream<'a> {
        Box::new(X86Disassembly::new(self.decoder(), rdr))
    }
}

impl RewriterFactory for X86Architecture {
    fn create_rewriter<'a>(
        &'a self,
        instrs: DisassemblyStream<'a>,
        state: &'a mut dyn ProcessorState,
        frame: &'a mut Frame,
        host: &'a dyn RewriterHost,
    ) -> RtlStream<'a> {
        Box::new(X86Rewriter::new(self, instrs, state, frame, host))
    }
}

impl PointerScanning for X86Architecture {
    fn create_pointer_scanner<'a>(
        &'a self,
        segments: &'a SegmentMap,
        rdr: ImageReader<'a>,
        known: &'a HashSet<Address>,
        flags: PointerScannerFlags,
    ) -> Box<dyn Iterator<Item = Address> + 'a> {
        Box::new(PointerScanner::new(
            X86ReferenceMatcher::new(self.mode),
            segments,
            rdr,
            known,
            flags,
        ))
    }
}
