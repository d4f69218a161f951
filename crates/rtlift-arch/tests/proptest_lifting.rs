//! Property-based tests for the x86 decoder, rewriter and lifting driver.
//!
//! These tests verify invariants that should hold for all inputs:
//! - Decoding never panics and respects the 15-byte limit
//! - Lifted clusters tile the instruction stream with no gaps or overlaps
//! - `xor r, r` lifts to exactly one `r = 0<w>` for every register
//! - Register lookups by name and by index are inverse to the table
//! - Cloned processor states are independent

use proptest::prelude::*;

use rtlift_arch::x86::{registers, ProcessorMode, X86Architecture, X86Decoder};
use rtlift_arch::{
    lift_procedure, DisassemblerFactory, LiftConfig, NullHost, ProcessorArchitecture,
    RewriterFactory, UnsupportedPolicy,
};
use rtlift_core::{Address, Constant, Endianness, ImageReader, MemoryArea, RtlStatement};

fn mode_strategy() -> impl Strategy<Value = ProcessorMode> {
    prop_oneof![Just(ProcessorMode::Real16), Just(ProcessorMode::Protected32)]
}

fn base(mode: ProcessorMode) -> Address {
    match mode {
        ProcessorMode::Real16 => Address::segmented(0x0800, 0x0100).unwrap(),
        ProcessorMode::Protected32 => Address::ptr32(0x0040_1000),
    }
}

// =============================================================================
// Decoder Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(5000))]

    /// Decoding arbitrary bytes should never panic.
    #[test]
    fn decode_never_panics(mode in mode_strategy(), bytes in prop::collection::vec(any::<u8>(), 0..32)) {
        let _ = X86Decoder::new(mode).decode_instruction(&bytes, base(mode));
    }

    /// Successfully decoded instructions have a valid size and echo their bytes.
    #[test]
    fn decoded_size_is_valid(mode in mode_strategy(), bytes in prop::collection::vec(any::<u8>(), 1..32)) {
        if let Ok(decoded) = X86Decoder::new(mode).decode_instruction(&bytes, base(mode)) {
            prop_assert!(decoded.size >= 1);
            prop_assert!(decoded.size <= 15);
            prop_assert!(decoded.size <= bytes.len());
            prop_assert_eq!(decoded.instruction.length, decoded.size);
            prop_assert_eq!(&decoded.instruction.bytes[..], &bytes[..decoded.size]);
            prop_assert_eq!(decoded.instruction.address, base(mode));
        }
    }

    /// Decoding is deterministic: same input always produces same output.
    #[test]
    fn decode_is_deterministic(mode in mode_strategy(), bytes in prop::collection::vec(any::<u8>(), 1..32)) {
        let decoder = X86Decoder::new(mode);
        let a = decoder.decode_instruction(&bytes, base(mode)).map(|d| d.instruction);
        let b = decoder.decode_instruction(&bytes, base(mode)).map(|d| d.instruction);
        prop_assert_eq!(a, b);
    }
}

// =============================================================================
// Lifting Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// With the partial policy every byte is covered by exactly one cluster.
    #[test]
    fn clusters_tile_the_image(mode in mode_strategy(), bytes in prop::collection::vec(any::<u8>(), 1..64)) {
        let arch = X86Architecture::new(mode);
        let mem = MemoryArea::new(base(mode), bytes.clone());
        let config = LiftConfig::new()
            .with_unsupported(UnsupportedPolicy::MarkPartial)
            .with_stop_at_unconditional_transfer(false);
        let lifted = lift_procedure(&arch, &mem, mem.base, &NullHost, &config).unwrap();

        let mut expected = mem.base;
        for cluster in &lifted.clusters {
            prop_assert_eq!(cluster.address, expected);
            prop_assert!(cluster.length >= 1);
            expected = cluster.end_address();
        }
        prop_assert_eq!(expected, mem.base.wrapping_add(bytes.len() as u64));
    }

    /// The rewriter stream never yields more clusters than instructions decoded.
    #[test]
    fn rewriter_is_lazy_and_bounded(bytes in prop::collection::vec(any::<u8>(), 0..48)) {
        let arch = X86Architecture::new(ProcessorMode::Protected32);
        let rdr = ImageReader::from_bytes(&bytes, Address::ptr32(0x1000), Endianness::Little);
        let decoded = arch.create_disassembler(rdr.clone()).count();
        let mut state = arch.create_processor_state();
        let mut frame = arch.create_frame();
        let lifted = arch
            .create_rewriter(arch.create_disassembler(rdr), state.as_mut(), &mut frame, &NullHost)
            .count();
        prop_assert!(lifted <= decoded);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// `xor r, r` zeroes r with a single assignment, whatever r is.
    #[test]
    fn self_xor_is_single_zeroing(mode in mode_strategy(), reg in 0u8..8, wide in any::<bool>()) {
        let arch = X86Architecture::new(mode);
        let opcode = if wide { 0x31 } else { 0x30 };
        let modrm = 0xC0 | (reg << 3) | reg;
        let bytes = [opcode, modrm];
        let rdr = ImageReader::from_bytes(&bytes, base(mode), Endianness::Little);

        let mut state = arch.create_processor_state();
        let mut frame = arch.create_frame();
        let clusters: Vec<_> = arch
            .create_rewriter(arch.create_disassembler(rdr), state.as_mut(), &mut frame, &NullHost)
            .collect();
        prop_assert_eq!(clusters.len(), 1);
        let cluster = clusters[0].as_ref().unwrap();
        prop_assert_eq!(cluster.statements.len(), 1);

        let bits = if wide { mode.default_bits() } else { 8 };
        let r = registers::gpr(reg, bits);
        let is_zeroing = matches!(
            &cluster.statements[0],
            RtlStatement::Assignment { dst, src }
                if dst.to_string() == r.name && src.to_string() == format!("0<{}>", bits)
        );
        prop_assert!(is_zeroing, "got {}", cluster.statements[0]);
        prop_assert_eq!(state.get_register(r), Constant::zero(bits));
    }

    /// Registers are found by their own name and index.
    #[test]
    fn register_lookup_round_trips(mode in mode_strategy(), pick in any::<prop::sample::Index>()) {
        let arch = X86Architecture::new(mode);
        let regs: Vec<_> = arch.registers().iter().copied().collect();
        let r = regs[pick.index(regs.len())];
        prop_assert_eq!(arch.register_by_name(r.name), Some(r));
        prop_assert_eq!(arch.register_by_index(r.number), Some(r));
    }

    /// Mutating a cloned state leaves the original unchanged.
    #[test]
    fn cloned_state_is_independent(reg in 0u8..8, a in any::<u32>(), b in any::<u32>()) {
        let arch = X86Architecture::new(ProcessorMode::Protected32);
        let r = registers::gpr(reg, 32);
        let mut original = arch.create_processor_state();
        original.set_register(r, Constant::new(32, a as u128));
        let mut copy = original.clone();
        copy.set_register(r, Constant::new(32, b as u128));
        copy.adjust_stack_depth(4);
        prop_assert_eq!(original.get_register(r), Constant::new(32, a as u128));
        prop_assert_eq!(original.stack_depth(), 0);
        prop_assert_eq!(copy.get_register(r), Constant::new(32, b as u128));
    }
}
