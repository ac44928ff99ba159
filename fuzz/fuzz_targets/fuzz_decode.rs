#![no_main]
use libfuzzer_sys::fuzz_target;
use zenload::{LoadRequest, Limits, MemoryReader};

// Loads must terminate without panicking; the bound catches a stuck state machine.
const MAX_STEPS: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    let limits = Limits {
        max_pixels: Some(1 << 22),
        max_memory_bytes: Some(64 << 20),
        ..Default::default()
    };
    for name in ["f.png", "f.jpg", "f.ff", "f.bin"] {
        let mut ctx = LoadRequest::new(name)
            .with_limits(limits.clone())
            .begin_with(MemoryReader::new(data).with_block_size(4096));
        let mut steps = 0;
        while ctx.step(&enough::Unstoppable) {
            steps += 1;
            assert!(steps < MAX_STEPS, "{name}: load did not terminate");
        }
        assert!(ctx.take_result().is_some());
        ctx.free();
    }
});
