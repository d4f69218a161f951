//! The processor architecture contract and its capability traits.

use crate::{
    ArchError, ArchitectureDescriptor, DecodeError, PointerScannerFlags, ProcessorState,
    RewriteError, UserOptions,
};
use rtlift_core::{
    Address, Bitness, Constant, Expression, FlagGroupStorage, FlagTable, Frame,
    FunctionSignature, ImageReader, ImageWriter, MachineInstruction, MemoryArea, RegisterFile,
    RegisterStorage, RtlInstructionCluster, SegmentMap,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Lazy, forward-only sequence of decoded instructions.
pub type DisassemblyStream<'a> = Box<dyn Iterator<Item = Result<MachineInstruction, DecodeError>> + 'a>;

/// Lazy, forward-only sequence of lifted instruction clusters.
pub type RtlStream<'a> = Box<dyn Iterator<Item = Result<RtlInstructionCluster, RewriteError>> + 'a>;

/// Builds addresses the way an architecture spells them.
pub trait AddressFactory {
    /// Creates a flat address from a constant; fails only when the magnitude
    /// does not fit a pointer.
    fn make_address_from_constant(&self, c: Constant) -> rtlift_core::Result<Address>;

    /// Creates a `selector:offset` address.
    fn make_segmented_address(&self, selector: u64, offset: u64) -> rtlift_core::Result<Address>;

    /// Parses the textual form of an address.
    fn parse_address(&self, text: &str) -> rtlift_core::Result<Address>;
}

/// Produces disassemblers.
pub trait DisassemblerFactory {
    /// Decodes instructions starting at the reader's position.
    fn create_disassembler<'a>(&'a self, rdr: ImageReader<'a>) -> DisassemblyStream<'a>;
}

/// Produces instruction rewriters.
pub trait RewriterFactory {
    /// Lifts each instruction of `instrs`, threading `state` and `frame`.
    fn create_rewriter<'a>(
        &'a self,
        instrs: DisassemblyStream<'a>,
        state: &'a mut dyn ProcessorState,
        frame: &'a mut Frame,
        host: &'a dyn RewriterHost,
    ) -> RtlStream<'a>;
}

/// Finds references to known addresses in raw memory.
pub trait PointerScanning {
    /// Yields the address of every location in the reader's range that
    /// references a member of `known`.
    fn create_pointer_scanner<'a>(
        &'a self,
        segments: &'a SegmentMap,
        rdr: ImageReader<'a>,
        known: &'a HashSet<Address>,
        flags: PointerScannerFlags,
    ) -> Box<dyn Iterator<Item = Address> + 'a>;
}

/// Callbacks into the decompiler that drives a lift.
pub trait RewriterHost: Send + Sync {
    /// Returns the name of the imported procedure at `addr`, if any.
    fn imported_procedure(&self, _addr: Address) -> Option<String> {
        None
    }

    /// Returns the signature of the procedure at `addr`, if known.
    fn callee_signature(&self, _addr: Address) -> Option<FunctionSignature> {
        None
    }

    /// Returns true if control flow elsewhere is known to reach `addr`.
    /// Instructions at such addresses always start their own cluster.
    fn is_jump_target(&self, _addr: Address) -> bool {
        false
    }

    fn warn(&self, addr: Address, message: &str);

    fn error(&self, addr: Address, message: &str);
}

/// Host that resolves nothing and forwards diagnostics to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl RewriterHost for NullHost {
    fn warn(&self, addr: Address, message: &str) {
        log::warn!("{}: {}", addr, message);
    }

    fn error(&self, addr: Address, message: &str) {
        log::error!("{}: {}", addr, message);
    }
}

/// A processor architecture: the composition root binding its register
/// tables to its decoding, rewriting and scanning capabilities.
pub trait ProcessorArchitecture: Send + Sync {
    /// Returns the shared, immutable tables.
    fn descriptor(&self) -> &Arc<ArchitectureDescriptor>;

    /// Returns the registry name.
    fn name(&self) -> &str {
        self.descriptor().name
    }

    fn registers(&self) -> &RegisterFile {
        &self.descriptor().registers
    }

    fn flags(&self) -> &FlagTable {
        &self.descriptor().flags
    }

    fn register_by_index(&self, number: u16) -> Option<RegisterStorage> {
        self.registers().by_index(number)
    }

    fn register_by_name(&self, name: &str) -> Option<RegisterStorage> {
        self.registers().by_name(name)
    }

    fn subregister(&self, parent: &RegisterStorage, bit_offset: u16, width: u16) -> Option<RegisterStorage> {
        self.registers().subregister(parent, bit_offset, width)
    }

    fn widest_subregister(
        &self,
        reg: &RegisterStorage,
        in_use: &HashSet<RegisterStorage>,
    ) -> Option<RegisterStorage> {
        self.registers().widest_subregister(reg, in_use)
    }

    fn flag_group_from_mask(&self, mask: u32) -> Option<FlagGroupStorage> {
        self.flags().group_from_mask(mask)
    }

    fn flag_group_from_name(&self, name: &str) -> Option<FlagGroupStorage> {
        self.flags().group_from_name(name)
    }

    fn stack_register(&self) -> RegisterStorage {
        self.descriptor().stack_register
    }

    fn pointer_bitness(&self) -> Bitness {
        self.descriptor().pointer_bitness
    }

    fn create_processor_state(&self) -> Box<dyn ProcessorState>;

    fn create_frame(&self) -> Frame {
        Frame::new(self.descriptor().word_bits)
    }

    fn create_image_reader<'a>(&self, mem: &'a MemoryArea, addr: Address) -> rtlift_core::Result<ImageReader<'a>> {
        ImageReader::new(mem, addr, self.descriptor().endianness)
    }

    fn create_image_writer<'a>(
        &self,
        mem: &'a mut MemoryArea,
        addr: Address,
    ) -> rtlift_core::Result<ImageWriter<'a>> {
        ImageWriter::new(mem, addr, self.descriptor().endianness)
    }

    /// Returns the memory access `bits` wide at `offset` from the stack pointer.
    fn create_stack_access(&self, offset: i32, bits: u16) -> Expression {
        let sp = self.stack_register();
        Expression::mem(Expression::add(Expression::Register(sp), offset as i64, sp.bit_size), bits)
    }

    fn address_factory(&self) -> Option<&dyn AddressFactory> {
        None
    }

    fn disassembler_factory(&self) -> Option<&dyn DisassemblerFactory> {
        None
    }

    fn rewriter_factory(&self) -> Option<&dyn RewriterFactory> {
        None
    }

    fn pointer_scanning(&self) -> Option<&dyn PointerScanning> {
        None
    }

    /// Returns the options a project must persist to recreate this architecture.
    fn save_user_options(&self) -> UserOptions {
        UserOptions::new()
    }

    /// Applies persisted options.
    fn load_user_options(&mut self, options: &UserOptions) -> Result<(), ArchError> {
        if let Some(key) = options.keys().next() {
            return Err(ArchError::invalid_option(key.as_str(), "not supported"));
        }
        Ok(())
    }
}
