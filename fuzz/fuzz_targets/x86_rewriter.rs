#![no_main]

use libfuzzer_sys::fuzz_target;
use rtlift_arch::x86::{ProcessorMode, X86Architecture};
use rtlift_arch::{lift_procedure, LiftConfig, NullHost};
use rtlift_core::{Address, MemoryArea};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, code)) = data.split_first() else {
        return;
    };
    if code.is_empty() {
        return;
    }
    let (mode, base) = if selector & 1 == 0 {
        (ProcessorMode::Protected32, Address::ptr32(0x0040_1000))
    } else {
        match Address::segmented(0x0800, 0x0100) {
            Ok(addr) => (ProcessorMode::Real16, addr),
            Err(_) => return,
        }
    };

    let arch = X86Architecture::new(mode);
    let mem = MemoryArea::new(base, code.to_vec());
    let config = LiftConfig::new()
        .with_max_instructions(256)
        .with_stop_at_unconditional_transfer(selector & 2 == 0);

    // Lifting should never panic, and clusters must tile the code they cover.
    if let Ok(lifted) = lift_procedure(&arch, &mem, base, &NullHost, &config) {
        let mut expected = base;
        for cluster in &lifted.clusters {
            assert_eq!(cluster.address, expected);
            expected = cluster.end_address();
        }
    }
});
