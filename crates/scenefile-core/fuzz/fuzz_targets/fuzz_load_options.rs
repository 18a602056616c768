#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scenefile_core::load::{LoadOptions, load_bytes};
use scenefile_core::session::DuplicatePolicy;

#[derive(Debug, Arbitrary)]
struct Input {
    check_duplicates: bool,
    automatic: bool,
    as_dynamic: bool,
    policy: u8,
    max_sequence_len: u16,
    file: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // A valid scene reloaded over itself under arbitrary options, then the
    // raw input as a file. Neither may panic.
    let duplicate_policy = match input.policy % 4 {
        0 => DuplicatePolicy::CreateNew,
        1 => DuplicatePolicy::UseExisting,
        2 => DuplicatePolicy::ReplaceExisting,
        _ => DuplicatePolicy::Rename,
    };
    let options = LoadOptions {
        check_duplicates: input.check_duplicates,
        automatic: input.automatic,
        check_dependencies: false,
        as_dynamic: input.as_dynamic,
        duplicate_policy,
        max_sequence_len: input.max_sequence_len as usize,
    };

    let mut session = scenefile_core::test_utils::session();
    let ids = scenefile_core::test_utils::add_scene(&mut session);
    let bytes = scenefile_core::test_utils::save(&mut session, &ids);
    let _ = load_bytes(&mut session, &bytes, &options);
    let _ = load_bytes(&mut session, &input.file, &options);
});
