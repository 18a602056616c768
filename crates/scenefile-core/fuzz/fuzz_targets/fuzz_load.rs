#![no_main]
use libfuzzer_sys::fuzz_target;
use scenefile_core::load::{LoadOptions, load_bytes};

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to the whole-file loader.
    // Must not panic -- returning Err is fine.
    let mut session = scenefile_core::test_utils::session();
    let _ = load_bytes(&mut session, data, &LoadOptions::default());
});
