#![no_main]

use libfuzzer_sys::fuzz_target;
use rtlift_arch::x86::{ProcessorMode, X86Decoder};
use rtlift_core::Address;

fuzz_target!(|data: &[u8]| {
    // The first byte selects the processor mode.
    let Some((&selector, code)) = data.split_first() else {
        return;
    };
    let (mode, base) = if selector & 1 == 0 {
        (ProcessorMode::Protected32, Address::ptr32(0x1000))
    } else {
        match Address::segmented(0x0800, 0x0100) {
            Ok(addr) => (ProcessorMode::Real16, addr),
            Err(_) => return,
        }
    };
    let decoder = X86Decoder::new(mode);

    // Decoding should never panic; errors are fine.
    let _ = decoder.decode_instruction(code, base);

    // Walk the whole buffer, skipping a byte on error.
    let mut offset = 0;
    let mut count = 0;
    while offset < code.len() && count < 100 {
        match decoder.decode_instruction(&code[offset..], base.wrapping_add(offset as u64)) {
            Ok(decoded) => {
                assert!(decoded.size >= 1 && decoded.size <= 15);
                offset += decoded.size;
            }
            Err(_) => offset += 1,
        }
        count += 1;
    }
});
